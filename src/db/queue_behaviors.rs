// BDD-style tests for the flow processing notification queue: delayed
// visibility, at-least-once redelivery, and acknowledgement.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::test_support::{reset_tables, setup_schema, test_db, unique_client, unique_flow};
use crate::types::{FlowProcessingRequest, WorkerId};
use std::time::Duration;

mod notification_queue {

    mod when_a_notification_has_no_delivery_time {
        use super::super::*;

        #[tokio::test]
        #[ignore = "requires DATABASE_URL or FLEETFLOW_TEST_DATABASE_URL"]
        async fn then_it_is_claimable_immediately() {
            let db = test_db().await;
            setup_schema(&db).await;
            reset_tables(&db).await;

            let note = FlowProcessingRequest::new(unique_client(), unique_flow());
            db.write_flow_processing_requests(std::slice::from_ref(&note))
                .await
                .unwrap_or_else(|e| panic!("write failed: {}", e));

            let worker = WorkerId::new("pump-1");
            let claimed = db
                .claim_flow_processing_requests(&worker, Duration::from_secs(60), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert_eq!(claimed.len(), 1);
            assert_eq!(claimed[0].client_id, note.client_id);
            assert_eq!(claimed[0].flow_id, note.flow_id);
        }
    }

    mod when_a_notification_has_a_future_delivery_time {
        use super::super::*;

        #[tokio::test]
        #[ignore = "requires DATABASE_URL or FLEETFLOW_TEST_DATABASE_URL"]
        async fn then_it_stays_invisible_until_the_time_passes() {
            let db = test_db().await;
            setup_schema(&db).await;
            reset_tables(&db).await;

            let delivery_time = chrono::Utc::now() + chrono::Duration::milliseconds(300);
            let note = FlowProcessingRequest::new(unique_client(), unique_flow())
                .with_delivery_time(delivery_time);
            db.write_flow_processing_requests(&[note])
                .await
                .unwrap_or_else(|e| panic!("write failed: {}", e));

            let worker = WorkerId::new("pump-1");
            let early = db
                .claim_flow_processing_requests(&worker, Duration::from_secs(60), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert!(early.is_empty(), "a delayed notification must stay hidden");

            tokio::time::sleep(Duration::from_millis(400)).await;

            let due = db
                .claim_flow_processing_requests(&worker, Duration::from_secs(60), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert_eq!(due.len(), 1);
            assert!(
                chrono::Utc::now() >= delivery_time,
                "delivery must happen after the requested time"
            );
        }
    }

    mod when_a_claim_is_never_acknowledged {
        use super::super::*;

        #[tokio::test]
        #[ignore = "requires DATABASE_URL or FLEETFLOW_TEST_DATABASE_URL"]
        async fn then_the_notification_redelivers_after_the_claim_lease() {
            let db = test_db().await;
            setup_schema(&db).await;
            reset_tables(&db).await;

            let note = FlowProcessingRequest::new(unique_client(), unique_flow());
            db.write_flow_processing_requests(&[note])
                .await
                .unwrap_or_else(|e| panic!("write failed: {}", e));

            let worker = WorkerId::new("pump-1");
            let first = db
                .claim_flow_processing_requests(&worker, Duration::from_millis(100), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert_eq!(first.len(), 1);

            let during_lease = db
                .claim_flow_processing_requests(&worker, Duration::from_millis(100), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert!(during_lease.is_empty());

            tokio::time::sleep(Duration::from_millis(200)).await;

            let redelivered = db
                .claim_flow_processing_requests(&worker, Duration::from_millis(100), 10)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert_eq!(redelivered.len(), 1, "unacked notifications must redeliver");
            assert_eq!(redelivered[0].id, first[0].id);
        }
    }

    mod when_a_claim_is_acknowledged {
        use super::super::*;

        #[tokio::test]
        #[ignore = "requires DATABASE_URL or FLEETFLOW_TEST_DATABASE_URL"]
        async fn then_the_notification_is_gone_for_good() {
            let db = test_db().await;
            setup_schema(&db).await;
            reset_tables(&db).await;

            db.write_flow_processing_requests(&[
                FlowProcessingRequest::new(unique_client(), unique_flow()),
                FlowProcessingRequest::new(unique_client(), unique_flow()),
            ])
            .await
            .unwrap_or_else(|e| panic!("write failed: {}", e));

            let worker = WorkerId::new("pump-1");
            let claimed = db
                .claim_flow_processing_requests(&worker, Duration::from_millis(100), 1)
                .await
                .unwrap_or_else(|e| panic!("claim failed: {}", e));
            assert_eq!(claimed.len(), 1);

            db.ack_flow_processing_requests(&claimed)
                .await
                .unwrap_or_else(|e| panic!("ack failed: {}", e));

            tokio::time::sleep(Duration::from_millis(200)).await;

            let remaining = db
                .read_flow_processing_requests()
                .await
                .unwrap_or_else(|e| panic!("read failed: {}", e));
            assert_eq!(remaining.len(), 1, "only the unacked notification remains");
            assert_ne!(remaining[0].id, claimed[0].id);
        }
    }
}
