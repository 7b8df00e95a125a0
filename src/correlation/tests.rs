#[cfg(test)]
mod tests {
    use crate::correlation::table::Correlations;
    use crate::correlation::types::{Reply, ReplyEnvelope, RequestId};
    use crate::dataset::types::{DatasetId, PartialOutcome, PartialResult};
    use std::time::Duration;
    use tokio::time::Instant;

    fn no_data(request_id: &RequestId, dataset: &str) -> ReplyEnvelope {
        ReplyEnvelope {
            request_id: request_id.clone(),
            reply: Reply::Partial(PartialResult {
                dataset: DatasetId::new(dataset),
                outcome: PartialOutcome::NoData,
            }),
        }
    }

    #[tokio::test]
    async fn test_reply_reaches_its_request() {
        let table = Correlations::new();
        let mut pending = table.open();
        let other = table.open();

        assert!(table.deliver(no_data(pending.request_id(), "a")));

        let deadline = Instant::now() + Duration::from_secs(1);
        match pending.next_before(deadline).await {
            Some(Reply::Partial(partial)) => assert_eq!(partial.dataset, DatasetId::new("a")),
            other => panic!("Unexpected reply {:?}", other),
        }
        drop(other);
    }

    #[tokio::test]
    async fn test_unknown_request_is_discarded() {
        let table = Correlations::new();
        assert!(!table.deliver(no_data(&RequestId::new(), "a")));
    }

    #[tokio::test]
    async fn test_straggler_after_drop_is_discarded() {
        let table = Correlations::new();
        let pending = table.open();
        let request_id = pending.request_id().clone();
        assert_eq!(table.pending_count(), 1);

        drop(pending);
        assert_eq!(table.pending_count(), 0);
        assert!(!table.deliver(no_data(&request_id, "late")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ends_at_deadline() {
        let table = Correlations::new();
        let mut pending = table.open();

        let started = Instant::now();
        let reply = pending.next_before(started + Duration::from_secs(5)).await;

        assert!(reply.is_none());
        assert!(Instant::now() >= started + Duration::from_secs(5));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
