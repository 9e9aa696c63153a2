//! Smoke Screen Unit tests for storefront components
//!
//! These tests exercise public building blocks in isolation from the
//! integration scenarios. They are intended as smoke-screen and generally
//! test the happy-path.

use storefront::{
    ApprovalStatus, CalendarDate, FsImageStore, ImageStore, LogTransport, Mail, MailOutbox,
    MemoryIndex, Notifier, OrderId, ProductDocument, ProductId, SearchIndex, StockPolicy,
    StorefrontConfig, TimeStamp, UserId, telemetry, utils,
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Identifiers render as bech32 with their entity prefix
    #[test]
    fn ids_round_trip_through_text() {
        let id = OrderId::new();
        let text = id.to_string();

        assert!(text.starts_with("order1"));
        assert_eq!(text.parse::<OrderId>().unwrap(), id);
    }

    /// A user id string is not accepted where an order id is expected
    #[test]
    fn ids_reject_foreign_prefix() {
        let text = UserId::new().to_string();
        assert!(text.parse::<OrderId>().is_err());
        assert!("not-an-id".parse::<ProductId>().is_err());
    }

    /// Hashing is salted, verification only accepts the original password
    #[test]
    fn credentials_are_salted() {
        let first = utils::hash_credential("hunter2");
        let second = utils::hash_credential("hunter2");

        assert_ne!(first, second);
        assert!(utils::verify_credential(&first, "hunter2"));
        assert!(!utils::verify_credential(&first, "hunter3"));
    }
}

// TYPES MODULE TESTS
#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn calendar_dates_validate() {
        assert!(CalendarDate::from_ymd(2024, 2, 29).is_ok());
        assert!(CalendarDate::from_ymd(2023, 2, 29).is_err());
        assert_eq!(
            CalendarDate::from_ymd(2024, 7, 4).unwrap().to_string(),
            "2024-07-04"
        );
    }

    #[test]
    fn timestamp_exposes_its_day() {
        let ts = TimeStamp::new_with(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(ts.date(), CalendarDate::from_ymd(2024, 3, 9).unwrap());
    }
}

// COLLABORATOR TESTS
#[cfg(test)]
mod collaborator_tests {
    use super::*;

    #[test]
    fn fs_images_live_under_their_kind() {
        let dir = tempfile::tempdir().unwrap();
        let images = FsImageStore::new(dir.path());

        let image = images.store(b"jpeg", "products/paneer.jpg").unwrap();

        assert!(image.as_str().starts_with("products/"));
        assert_eq!(std::fs::read(dir.path().join(image.as_str())).unwrap(), b"jpeg");
    }

    #[test]
    fn outbox_accepts_mail() {
        let (outbox, handle) = MailOutbox::spawn(4, LogTransport);

        outbox
            .enqueue(Mail::new("asha@shop.test", "Daily Purchase Reminder", "hello"))
            .unwrap();
        drop(outbox);

        handle.join().unwrap();
    }

    #[test]
    fn memory_index_finds_by_brand() {
        let index = MemoryIndex::default();
        let id = ProductId::new();
        index
            .upsert(ProductDocument {
                id,
                name: "Paneer".into(),
                description: "fresh cottage cheese".into(),
                brand: "Mother Dairy".into(),
            })
            .unwrap();

        assert_eq!(index.search("mother").unwrap(), vec![id]);
        assert!(index.search("amul").unwrap().is_empty());
    }
}

// AMBIENT TESTS
#[cfg(test)]
mod ambient_tests {
    use super::*;

    #[test]
    fn default_config_rejects_negative_stock() {
        let config = StorefrontConfig::default();
        assert_eq!(config.stock_policy, StockPolicy::Reject);
        assert!(config.outbox_capacity > 0);
    }

    #[test]
    fn tracing_setup_is_repeatable() {
        telemetry::setup_tracing();
        telemetry::setup_tracing();
    }

    #[test]
    fn approval_status_words() {
        assert_eq!(ApprovalStatus::Approved.to_string(), "approved");
    }
}
