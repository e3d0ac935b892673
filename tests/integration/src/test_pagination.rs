//! Cursor paging and segmented scans.

#[cfg(test)]
mod tests {
    use dynaquery_core::{Batch, Cursor, Query};
    use dynaquery_model::SortDirection;

    use crate::{Order, order_store};

    fn probe() -> Order {
        Order::new("probe", 1, "nobody", "none", 0)
    }

    fn orders(n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| Order::new(&format!("o-{i}"), i as i64 + 1, "alice", "open", 10))
            .collect()
    }

    #[tokio::test]
    async fn test_should_page_through_query_results() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(7))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut cursor = String::new();
        let mut pages = 0;
        loop {
            let page = Query::new(store.clone(), &probe())
                .where_("customer", "=", "alice")
                .limit(3)
                .start_from(&cursor)
                .all()
                .await
                .unwrap();
            seen.extend(page.items.iter().map(|o| o.created));
            pages += 1;
            if !page.has_more() {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(pages, 3);
        assert_eq!(seen, (1..=7).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_should_keep_direction_across_pages() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(6))
            .await
            .unwrap();

        let first = Query::new(store.clone(), &probe())
            .where_("customer", "=", "alice")
            .sort(SortDirection::Desc)
            .limit(2)
            .all()
            .await
            .unwrap();
        assert_eq!(
            first.items.iter().map(|o| o.created).collect::<Vec<_>>(),
            vec![6, 5]
        );

        // The resumed query sets no direction; the cursor remembers it.
        let second = Query::new(store.clone(), &probe())
            .where_("customer", "=", "alice")
            .limit(2)
            .start_from(&first.cursor)
            .all()
            .await
            .unwrap();
        assert_eq!(
            second.items.iter().map(|o| o.created).collect::<Vec<_>>(),
            vec![4, 3]
        );
    }

    #[tokio::test]
    async fn test_should_round_trip_cursor_metadata() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(3))
            .await
            .unwrap();

        let page = Query::new(store.clone(), &probe())
            .where_("customer", "=", "alice")
            .sort(SortDirection::Desc)
            .limit(1)
            .all()
            .await
            .unwrap();

        let cursor = Cursor::decode(&page.cursor).unwrap().unwrap();
        assert_eq!(cursor.index_name.as_deref(), Some("customer-index"));
        assert_eq!(cursor.sort_direction, SortDirection::Desc);
        assert!(cursor.last_evaluated_key.contains_key("order_id"));
        assert_eq!(cursor.encode().unwrap(), page.cursor);
    }

    #[tokio::test]
    async fn test_should_finish_with_empty_cursor() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(2))
            .await
            .unwrap();

        let page = Query::new(store.clone(), &probe())
            .where_("customer", "=", "alice")
            .all()
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.cursor.is_empty());
        assert!(!page.has_more());
    }

    #[tokio::test]
    async fn test_should_skip_offset_rows() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(5))
            .await
            .unwrap();

        let page = Query::new(store.clone(), &probe())
            .where_("customer", "=", "alice")
            .offset(2)
            .all()
            .await
            .unwrap();
        assert_eq!(
            page.items.iter().map(|o| o.created).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[tokio::test]
    async fn test_should_scan_one_segment() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(10))
            .await
            .unwrap();

        let page = Query::new(store.clone(), &probe())
            .parallel_scan(0, 2)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn test_should_collect_every_segment() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(20))
            .await
            .unwrap();

        let items = Query::new(store.clone(), &probe())
            .scan_all_segments(4)
            .await
            .unwrap();
        let mut created: Vec<i64> = items.iter().map(|o| o.created).collect();
        created.sort_unstable();
        assert_eq!(created, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_should_filter_within_segments() {
        let store = order_store();
        Batch::<Order>::new(store.clone())
            .put_all(&orders(12))
            .await
            .unwrap();

        let items = Query::new(store.clone(), &probe())
            .filter("created", ">", 6_i64)
            .scan_all_segments(3)
            .await
            .unwrap();
        assert_eq!(items.len(), 6);
        assert!(items.iter().all(|o| o.created > 6));
    }
}
