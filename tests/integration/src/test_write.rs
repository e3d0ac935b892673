//! Write-path tests: create guards, updates, optimistic locking, deletes.

#[cfg(test)]
mod tests {
    use dynaquery_core::{Error, KeyError, Query};
    use dynaquery_model::AttributeValue;

    use crate::{Order, order_store, seed};

    #[tokio::test]
    async fn test_should_create_and_read_back() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        let found = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, order);
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_create_as_condition_failure() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        let err = Query::new(store.clone(), &order).create().await.unwrap_err();
        assert!(err.is_condition_failed());
        assert_eq!(store.table_len("orders"), 1);
    }

    #[tokio::test]
    async fn test_should_create_with_explicit_guard() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        // The explicit guard replaces the default no-overwrite guard, so
        // the second write goes through as a guarded upsert.
        let mut replacement = order.clone();
        replacement.amount = 75;
        Query::new(store.clone(), &replacement)
            .with_condition("status", "=", "open")
            .create()
            .await
            .unwrap();
        assert_eq!(store.table_len("orders"), 1);

        let err = Query::new(store.clone(), &replacement)
            .with_condition("status", "=", "shipped")
            .create()
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[tokio::test]
    async fn test_should_update_changed_fields_automatically() {
        let store = order_store();
        let mut order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        order.status = "shipped".to_owned();
        order.note = "left at door".to_owned();
        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update(&[])
            .await
            .unwrap();

        let found = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, "shipped");
        assert_eq!(found.note, "left at door");
        assert_eq!(found.created, 100);
        assert_eq!(found.amount, 40);
    }

    #[tokio::test]
    async fn test_should_update_only_named_fields() {
        let store = order_store();
        let mut order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        order.status = "shipped".to_owned();
        order.amount = 999;
        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update(&["status"])
            .await
            .unwrap();

        let found = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, "shipped");
        assert_eq!(found.amount, 40);
    }

    #[tokio::test]
    async fn test_should_require_complete_key_for_update() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        let err = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .update(&[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Key(KeyError::Incomplete { ref missing }) if missing == "created"
        ));
    }

    #[tokio::test]
    async fn test_should_apply_update_builder_actions() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        let updated = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .set("status", "shipped")
            .increment("amount", 10_i64)
            .remove("note")
            .execute_with_result()
            .await
            .unwrap();
        assert_eq!(updated.status, "shipped");
        assert_eq!(updated.amount, 50);
        assert!(updated.note.is_empty());
    }

    #[tokio::test]
    async fn test_should_set_only_when_absent() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .set_if_not_exists("note", "first note")
            .execute()
            .await
            .unwrap();
        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .set_if_not_exists("note", "second note")
            .execute()
            .await
            .unwrap();

        let found = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.note, "first note");
    }

    #[tokio::test]
    async fn test_should_guard_update_with_version() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        // The winning writer bumps the version in the same update.
        let updated = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .set("status", "shipped")
            .condition_version(1)
            .execute_with_result()
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // A writer still holding version 1 loses.
        let err = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .set("status", "cancelled")
            .condition_version(1)
            .execute()
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());

        let found = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, "shipped");
    }

    #[tokio::test]
    async fn test_should_mutate_sets_and_lists() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .add("labels", AttributeValue::string_set(["gift", "fragile"]))
            .append_to_list("events", vec![AttributeValue::from("packed")])
            .execute()
            .await
            .unwrap();
        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .update_builder()
            .delete_from_set("labels", AttributeValue::string_set(["fragile"]))
            .append_to_list("events", vec![AttributeValue::from("shipped")])
            .execute()
            .await
            .unwrap();

        let items = store.snapshot("orders");
        let item = &items[0];
        assert_eq!(
            item["labels"],
            AttributeValue::string_set(["gift"])
        );
        assert_eq!(
            item["events"],
            AttributeValue::L(vec!["packed".into(), "shipped".into()])
        );
    }

    #[tokio::test]
    async fn test_should_delete_with_leftover_condition() {
        let store = order_store();
        let order = Order::new("o-1", 100, "alice", "open", 40);
        Query::new(store.clone(), &order).create().await.unwrap();

        // A non-key where condition becomes the delete guard.
        let err = Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .where_("status", "=", "shipped")
            .delete()
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());
        assert_eq!(store.table_len("orders"), 1);

        Query::new(store.clone(), &order)
            .where_("id", "=", "o-1")
            .where_("created", "=", 100_i64)
            .where_("status", "=", "open")
            .delete()
            .await
            .unwrap();
        assert_eq!(store.table_len("orders"), 0);
    }
}
