//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Wire Protocol**: Gossip messages survive the bincode encoding used on UDP.
//! - **Directory**: Joins, versioned views, failure detection, downing and leave.
//! - **Partition Strategies**: Majority and keep-oldest authority decisions.
//! - **Gossip Service**: Message handling and a real loopback join.

#[cfg(test)]
mod tests {
    use crate::membership::directory::{DirectoryTiming, MembershipDirectory};
    use crate::membership::service::MembershipService;
    use crate::membership::strategy::StrategyKind;
    use crate::membership::types::{GossipMessage, Node, NodeId, NodeState, Role};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn node(port: u16) -> Node {
        Node::new_local(addr(port), addr(port + 1000))
    }

    fn node_joined_at(port: u16, joined_at: u64) -> Node {
        let mut node = node(port);
        node.joined_at = joined_at;
        node
    }

    fn directory(local: Node, strategy: StrategyKind) -> Arc<MembershipDirectory> {
        MembershipDirectory::new(local, Vec::new(), strategy.build(), DirectoryTiming::default())
    }

    fn fast_directory(local: Node, strategy: StrategyKind) -> Arc<MembershipDirectory> {
        MembershipDirectory::new(
            local,
            Vec::new(),
            strategy.build(),
            DirectoryTiming {
                suspect_after: Duration::from_millis(40),
                stability_window: Duration::from_millis(80),
            },
        )
    }

    // ============================================================
    // WIRE PROTOCOL TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        assert_ne!(NodeId::new(), NodeId::new(), "Each NodeId should be unique");
    }

    #[test]
    fn test_gossip_ack_bincode_roundtrip() {
        let members = vec![node(5000), node(5001)];
        let msg = GossipMessage::Ack {
            from: members[0].id.clone(),
            incarnation: 3,
            members: members.clone(),
        };

        let encoded = bincode::serialize(&msg).unwrap();
        let decoded: GossipMessage = bincode::deserialize(&encoded).unwrap();

        match decoded {
            GossipMessage::Ack {
                from,
                incarnation,
                members: decoded_members,
            } => {
                assert_eq!(from, members[0].id);
                assert_eq!(incarnation, 3);
                assert_eq!(decoded_members.len(), 2);
                assert_eq!(decoded_members[1].http_addr, addr(6001));
                assert!(decoded_members[1].last_seen.is_none(), "last_seen is never sent");
            }
            _ => panic!("Wrong message type"),
        }
    }

    // ============================================================
    // DIRECTORY VIEW TESTS
    // ============================================================

    #[test]
    fn test_founder_is_authoritative_leader() {
        let local = node(5000);
        let local_id = local.id.clone();
        let dir = directory(local, StrategyKind::Majority);

        let view = dir.current_view();
        assert_eq!(view.version, 1);
        assert!(view.converged, "No seeds means founder");
        assert!(view.authoritative);
        assert_eq!(view.leader(), Some(&local_id));
        assert_eq!(view.live_nodes(), vec![local_id]);
    }

    #[test]
    fn test_join_publishes_new_version_once() {
        let dir = directory(node(5000), StrategyKind::Majority);
        let peer = node(5001);

        dir.join(peer.clone());
        let after_join = dir.current_view();
        assert_eq!(after_join.version, 2);
        assert_eq!(after_join.members.len(), 2);

        // Same topology again: no new version.
        dir.join(peer.clone());
        dir.touch(&peer.id, peer.incarnation);
        assert_eq!(dir.current_view().version, 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_increasing_versions() {
        let dir = directory(node(5000), StrategyKind::Majority);
        let mut events = dir.subscribe();

        dir.join(node(5001));
        dir.join(node(5002));

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(second.version > first.version);
        assert_eq!(second.members.len(), 3);
    }

    #[test]
    fn test_members_sorted_and_single_leader() {
        let local = node_joined_at(5000, 300);
        let oldest = node_joined_at(5001, 100);
        let middle = node_joined_at(5002, 200);
        let dir = directory(local, StrategyKind::Majority);

        dir.join(oldest.clone());
        dir.join(middle);

        let view = dir.current_view();
        let ids: Vec<&NodeId> = view.members.iter().map(|m| &m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let leaders = view.members.iter().filter(|m| m.role == Role::Leader).count();
        assert_eq!(leaders, 1);
        assert_eq!(view.leader(), Some(&oldest.id));
    }

    #[test]
    fn test_unknown_ping_sender_is_not_touched() {
        let dir = directory(node(5000), StrategyKind::Majority);
        assert!(!dir.touch(&NodeId::new(), 1));
    }

    // ============================================================
    // FAILURE DETECTION TESTS
    // ============================================================

    #[test]
    fn test_silent_member_goes_suspect_then_dead() {
        let local = node(5000);
        let dir = directory(local, StrategyKind::KeepOldest);
        let peer = node_joined_at(5001, u64::MAX);
        dir.join(peer.clone());

        let later = Instant::now() + Duration::from_secs(60);

        let suspicions = dir.detect_failures(later);
        assert_eq!(suspicions.len(), 1);
        assert_eq!(dir.get_member(&peer.id).unwrap().state, NodeState::Suspect);
        assert!(
            dir.current_view().member(&peer.id).unwrap().reachable,
            "Suspect members still count as reachable"
        );

        dir.detect_failures(later);
        // Local node is the oldest, so its side is authoritative and downs the peer.
        assert!(dir.get_member(&peer.id).is_none());
        assert!(dir.is_downed(&peer.id));
        assert_eq!(dir.current_view().members.len(), 1);
    }

    #[test]
    fn test_majority_downs_unreachable_minority() {
        let dir = fast_directory(node(5000), StrategyKind::Majority);
        let alive = node(5001);
        let silent = node(5002);
        dir.join(alive.clone());
        dir.join(silent.clone());

        std::thread::sleep(Duration::from_millis(120));
        dir.touch(&alive.id, alive.incarnation);

        dir.detect_failures(Instant::now());
        dir.detect_failures(Instant::now());

        let view = dir.current_view();
        assert!(view.authoritative);
        assert!(dir.is_downed(&silent.id));
        assert_eq!(view.live_nodes().len(), 2);
    }

    #[test]
    fn test_minority_keeps_members_and_loses_authority() {
        let dir = directory(node(5000), StrategyKind::Majority);
        let a = node(5001);
        let b = node(5002);
        dir.join(a.clone());
        dir.join(b.clone());

        let later = Instant::now() + Duration::from_secs(60);
        dir.detect_failures(later);
        dir.detect_failures(later);

        let view = dir.current_view();
        assert!(!view.authoritative, "1 of 3 reachable is a minority");
        assert_eq!(view.leader(), None);
        assert_eq!(view.unreachable().len(), 2);
        assert!(!dir.is_downed(&a.id));
        assert!(!dir.is_downed(&b.id));
    }

    #[test]
    fn test_keep_oldest_follows_oldest_member() {
        let dir = directory(node_joined_at(5000, 500), StrategyKind::KeepOldest);
        let oldest = node_joined_at(5001, 100);
        dir.join(oldest);
        dir.join(node_joined_at(5002, 600));

        let later = Instant::now() + Duration::from_secs(60);
        dir.detect_failures(later);
        dir.detect_failures(later);

        // Local side lost the oldest node.
        assert!(!dir.current_view().authoritative);
    }

    #[test]
    fn test_direct_contact_revives_unreachable_member() {
        let dir = directory(node(5000), StrategyKind::Majority);
        let a = node(5001);
        let b = node(5002);
        dir.join(a.clone());
        dir.join(b.clone());

        let later = Instant::now() + Duration::from_secs(60);
        dir.detect_failures(later);
        dir.detect_failures(later);
        assert!(!dir.current_view().authoritative);

        dir.touch(&a.id, a.incarnation);
        let view = dir.current_view();
        assert!(view.member(&a.id).unwrap().reachable);
        assert!(view.authoritative, "2 of 3 reachable again");
    }

    #[test]
    fn test_refutes_suspicion_about_itself() {
        let local = node(5000);
        let local_id = local.id.clone();
        let dir = directory(local, StrategyKind::Majority);
        let before = dir.incarnation();

        let refutation = dir.suspect(&local_id, before);
        match refutation {
            Some(GossipMessage::Alive { node_id, incarnation }) => {
                assert_eq!(node_id, local_id);
                assert!(incarnation > before);
            }
            other => panic!("Expected Alive refutation, got {:?}", other),
        }
    }

    #[test]
    fn test_gossip_cannot_resurrect_downed_member() {
        let dir = directory(node_joined_at(5000, 1), StrategyKind::KeepOldest);
        let peer = node(5001);
        dir.join(peer.clone());

        let later = Instant::now() + Duration::from_secs(60);
        dir.detect_failures(later);
        dir.detect_failures(later);
        assert!(dir.is_downed(&peer.id));

        dir.merge(peer.clone());
        assert!(dir.get_member(&peer.id).is_none(), "Stale gossip ignored");

        dir.join(peer.clone());
        assert!(dir.get_member(&peer.id).is_some(), "Direct join revives");
        assert!(!dir.is_downed(&peer.id));
    }

    // ============================================================
    // LEAVE & CONVERGENCE TESTS
    // ============================================================

    #[test]
    fn test_leaving_node_drops_out_of_live_set() {
        let local = node(5000);
        let local_id = local.id.clone();
        let dir = directory(local, StrategyKind::Majority);
        let peer = node(5001);
        dir.join(peer.clone());

        let msg = dir.leave();
        assert!(matches!(msg, GossipMessage::Leave { node_id } if node_id == local_id));

        let view = dir.current_view();
        assert!(view.member(&local_id).unwrap().leaving);
        assert_eq!(view.live_nodes(), vec![peer.id]);
    }

    #[test]
    fn test_peer_leave_downs_it_immediately() {
        let dir = directory(node(5000), StrategyKind::Majority);
        let peer = node(5001);
        dir.join(peer.clone());

        dir.remove_left(&peer.id);
        assert!(dir.get_member(&peer.id).is_none());
        assert!(dir.is_downed(&peer.id));
    }

    #[test]
    fn test_unconverged_node_is_not_authoritative() {
        let local = node(5003);
        let seeds = vec![addr(5000), addr(5001), addr(5002)];
        let dir = MembershipDirectory::new(
            local,
            seeds,
            StrategyKind::Majority.build(),
            DirectoryTiming::default(),
        );
        assert!(!dir.current_view().authoritative);

        dir.join(node(5000));
        assert!(!dir.is_converged(), "1 of 3 seeds is no quorum");

        dir.join(node(5001));
        assert!(dir.is_converged());
        assert!(dir.current_view().converged);
    }

    // ============================================================
    // GOSSIP SERVICE TESTS
    // ============================================================

    async fn bind_service(seeds: Vec<SocketAddr>) -> Arc<MembershipService> {
        MembershipService::bind(
            addr(0),
            addr(8080),
            seeds,
            StrategyKind::Majority.build(),
            DirectoryTiming::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ping_from_unknown_node_adds_member() {
        let service = bind_service(Vec::new()).await;
        let stranger = NodeId::new();

        service
            .handle_message(
                GossipMessage::Ping {
                    from: stranger.clone(),
                    incarnation: 1,
                    http_addr: addr(7001),
                    joined_at: 42,
                },
                addr(6001),
            )
            .await
            .unwrap();

        let member = service.directory.get_member(&stranger).unwrap();
        assert_eq!(member.gossip_addr, addr(6001));
        assert_eq!(member.http_addr, addr(7001));
        assert_eq!(member.joined_at, 42);
    }

    #[tokio::test]
    async fn test_leave_message_removes_member() {
        let service = bind_service(Vec::new()).await;
        let peer = node(5001);
        service
            .handle_message(GossipMessage::Join { node: peer.clone() }, peer.gossip_addr)
            .await
            .unwrap();
        assert!(service.directory.get_member(&peer.id).is_some());

        service
            .handle_message(GossipMessage::Leave { node_id: peer.id.clone() }, peer.gossip_addr)
            .await
            .unwrap();
        assert!(service.directory.get_member(&peer.id).is_none());
    }

    #[tokio::test]
    async fn test_two_nodes_join_over_loopback() {
        let founder = bind_service(Vec::new()).await;
        let founder_addr = founder.gossip_addr().unwrap();
        let joiner = bind_service(vec![founder_addr]).await;

        founder.clone().start().await;
        joiner.clone().start().await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let founder_view = founder.directory.current_view();
            let joiner_view = joiner.directory.current_view();
            if founder_view.members.len() == 2 && joiner_view.members.len() == 2 && joiner_view.converged {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "Nodes did not converge");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let founder_view = founder.directory.current_view();
        let joiner_view = joiner.directory.current_view();
        assert_eq!(founder_view.live_nodes(), joiner_view.live_nodes());
        assert_eq!(founder_view.leader(), joiner_view.leader());
    }

    // ============================================================
    // STATUS ENDPOINT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_cluster_status_reports_view_and_entities() {
        use crate::cluster::NodeSettings;
        use crate::membership::handlers::cluster_status;
        use crate::testing::{EchoScorer, cluster};

        let cluster = cluster(3, Arc::new(EchoScorer), NodeSettings::default());
        let dataset = cluster.dataset_owned_by(0, "status");
        cluster.index(0, &dataset, &["a record"]).await;

        let node = &cluster.nodes[0];
        let status = cluster_status(&node.directory, &node.registry);
        assert_eq!(&status.self_node, node.local_id());
        assert!(status.authoritative);
        assert!(status.converged);
        assert_eq!(status.reachable.len(), 3);
        assert!(status.unreachable.is_empty());
        assert!(status.leader.is_some());
        assert_eq!(status.active_entities, 1);
        assert_eq!(status.suspect_after_ms, 5_000);
        assert_eq!(status.stability_window_ms, 15_000);
        assert_eq!(node.registry.active_datasets(), vec![dataset]);
    }
}
