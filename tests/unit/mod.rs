//! Unit tests for valkey-reshard.
//!
//! These tests run without a Valkey cluster and exercise the public API of
//! individual components in isolation.

mod topology_tests {
    use valkey_reshard::client::{Endpoint, NodeRole, TopologySnapshot};
    use valkey_reshard::slots::{SlotRange, SlotState};

    /// Six-node cluster mid-migration of slot 5460, with a hostname on one
    /// node and a replica per master.
    const NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004,node-4.local slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
824fe116063bc5fcf9f4ffd895bc17aee7731ac3 127.0.0.1:30006@31006 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1426238317741 6 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460 [5460->-67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1]
";

    const A: &str = "e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca";
    const B: &str = "67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1";
    const C: &str = "292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f";

    #[test]
    fn test_masters_in_topology_order() {
        let topo = TopologySnapshot::parse(NODES).unwrap();
        assert_eq!(topo.nodes().len(), 6);
        assert_eq!(topo.master_ids(), vec![B, C, A]);
        assert_eq!(topo.masters().count(), 3);
    }

    #[test]
    fn test_replica_is_reported_as_replica() {
        let topo = TopologySnapshot::parse(NODES).unwrap();
        let replica = topo
            .node("07c37dfeb235213a872192d90877d0cd55635b91")
            .unwrap();
        assert_eq!(replica.role(), NodeRole::Replica);
        assert_eq!(replica.master_id.as_deref(), Some(A));
        assert_eq!(replica.hostname.as_deref(), Some("node-4.local"));
        assert_eq!(replica.endpoint(), Endpoint::new("127.0.0.1", 30004));
    }

    #[test]
    fn test_ownership_in_slot_order() {
        let topo = TopologySnapshot::parse(NODES).unwrap();
        let ownership = topo.ownership();
        assert!(ownership.all_slots_assigned());
        assert_eq!(ownership.owners_in_slot_order(), vec![A, B, C]);
        assert_eq!(
            ownership.ranges(),
            vec![
                (SlotRange::new(0, 5460), A.to_string()),
                (SlotRange::new(5461, 10922), B.to_string()),
                (SlotRange::new(10923, 16383), C.to_string()),
            ]
        );
    }

    #[test]
    fn test_one_sided_marker_counts_as_in_migration() {
        let topo = TopologySnapshot::parse(NODES).unwrap();
        assert_eq!(topo.slots_in_migration(), vec![5460]);
        assert_eq!(
            topo.migration_markers(),
            vec![(A.to_string(), 5460, SlotState::Migrating { to: B.into() })]
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(TopologySnapshot::parse("not a cluster nodes line").is_err());
    }
}

mod config_tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use valkey_reshard::client::{Endpoint, migrate_reply_timeout};
    use valkey_reshard::{ExecutionMode, ReportFormat, ReshardConfig, ReshardError};

    #[test]
    fn test_uri_forms() {
        let config = ReshardConfig::new("redis://:secret@cache.internal:7000/0").unwrap();
        assert_eq!(config.target, Endpoint::new("cache.internal", 7000));
        assert!(!config.tls);

        let config = ReshardConfig::new("valkeys://[::1]").unwrap();
        assert_eq!(config.target, Endpoint::new("::1", 6379));
        assert!(config.tls);
    }

    #[test]
    fn test_defaults_are_safe() {
        let config = ReshardConfig::new("localhost:6379").unwrap();
        assert_eq!(config.mode, ExecutionMode::Preview);
        assert_eq!(config.report_format, ReportFormat::Text);
        assert!(!config.assign);
        assert!(!config.reshard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ca_cert_implies_tls() {
        let config = ReshardConfig::new("localhost:6379")
            .unwrap()
            .with_tls(false, Some(PathBuf::from("/etc/ssl/ca.pem")));
        assert!(config.tls);
    }

    #[test]
    fn test_unreadable_ca_cert_is_configuration_error() {
        let config = ReshardConfig::new("localhost:6379")
            .unwrap()
            .with_tls(true, Some(PathBuf::from("/nonexistent/valkey-reshard/ca.pem")));
        assert!(matches!(
            config.client_config(),
            Err(ReshardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_migrate_reply_wait_covers_migrate_timeout() {
        let config = ReshardConfig::new("localhost:6379").unwrap();
        let client = config.client_config().unwrap();
        assert!(config.migrate_timeout > client.command_timeout);

        let wait = migrate_reply_timeout(config.migrate_timeout);
        assert!(wait > config.migrate_timeout);
        assert!(wait > client.command_timeout);
    }

    #[test]
    fn test_client_config_without_tls() {
        let client = ReshardConfig::new("localhost:6379")
            .unwrap()
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
            .client_config()
            .unwrap();
        assert!(client.tls.is_none());
        assert!(client.password.is_none());
        assert_eq!(client.connection_timeout, Duration::from_secs(2));
        assert_eq!(client.command_timeout, Duration::from_secs(5));
    }
}

mod error_tests {
    use valkey_reshard::ReshardError;
    use valkey_reshard::client::ValkeyError;
    use valkey_reshard::slots::{MigrationStep, SlotRange};

    fn step_failure(step: MigrationStep) -> ReshardError {
        ReshardError::ProtocolStepFailure {
            slot: 42,
            source_node: "a".into(),
            destination: "b".into(),
            step,
            error: ValkeyError::Connection("reset by peer".into()),
        }
    }

    #[test]
    fn test_slots_in_migration_display_coalesces() {
        let err = ReshardError::SlotsInMigration {
            slots: vec![1, 2, 3, 7],
        };
        assert_eq!(
            err.to_string(),
            "Slots already in importing/migrating state: 1-3,7"
        );
    }

    #[test]
    fn test_protocol_failure_display() {
        let err = step_failure(MigrationStep::TransferKeys);
        let msg = err.to_string();
        assert!(msg.contains("slot 42"));
        assert!(msg.contains("transfer keys"));
        assert!(msg.contains("reset by peer"));
    }

    #[test]
    fn test_stranded_slot_by_step() {
        assert_eq!(step_failure(MigrationStep::MarkImporting).stranded_slot(), None);
        assert_eq!(
            step_failure(MigrationStep::MarkMigrating).stranded_slot(),
            Some(42)
        );
        assert_eq!(
            step_failure(MigrationStep::FinalizeDestination).stranded_slot(),
            Some(42)
        );
        assert_eq!(
            step_failure(MigrationStep::Broadcast { node: "c".into() }).stranded_slot(),
            None
        );
    }

    #[test]
    fn test_mutation_classification() {
        assert!(ReshardError::InsufficientNodes {
            required: 3,
            available: 2
        }
        .aborts_before_mutation());
        assert!(!step_failure(MigrationStep::CountKeys).aborts_before_mutation());
        assert!(!ReshardError::ClaimFailure {
            range: SlotRange::new(0, 10),
            node: "a".into(),
            error: ValkeyError::Connection("busy".into()),
        }
        .aborts_before_mutation());
    }
}

mod report_tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use valkey_reshard::client::TopologySnapshot;
    use valkey_reshard::slots::{DesiredOwnership, SlotRange, calculate_distribution};
    use valkey_reshard::{ExecutionMode, ReportFormat, Reporter};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    const NODES: &str = "\
aaaa 10.0.0.1:6379@16379 myself,master - 0 0 1 connected 0-100 200-16383
bbbb 10.0.0.2:6379@16379 master - 0 0 2 connected
";

    #[test]
    fn test_topology_and_desired_lines() {
        let buf = SharedBuf::default();
        let mut reporter = Reporter::to_writer(ReportFormat::Text, buf.clone());
        let topo = TopologySnapshot::parse(NODES).unwrap();
        reporter.record_topology(&topo, &topo.ownership());

        let desired = DesiredOwnership::new(
            calculate_distribution(2).unwrap(),
            vec!["aaaa".into(), "bbbb".into()],
        )
        .unwrap();
        reporter.record_desired(&desired, &["aaaa".to_string(), "bbbb".to_string()]);

        assert_eq!(
            buf.lines(),
            vec![
                "Node aaaa 10.0.0.1:6379 master slots 0-100,200-16383",
                "Node bbbb 10.0.0.2:6379 master",
                "Slots 0-100 are on node aaaa",
                "Slots 200-16383 are on node aaaa",
                "Node order: aaaa,bbbb",
                "Slots 0-8191 should be on node aaaa",
                "Slots 8192-16383 should be on node bbbb",
            ]
        );
    }

    #[test]
    fn test_empty_cluster_line() {
        let buf = SharedBuf::default();
        let mut reporter = Reporter::to_writer(ReportFormat::Text, buf.clone());
        let topo = TopologySnapshot::parse("aaaa 10.0.0.1:6379@16379 myself,master - 0 0 1 connected\n")
            .unwrap();
        reporter.record_topology(&topo, &topo.ownership());
        reporter.finish(ExecutionMode::Commit).unwrap();

        assert_eq!(
            buf.lines(),
            vec!["Node aaaa 10.0.0.1:6379 master", "No slots are assigned"]
        );
        assert_eq!(SlotRange::new(3, 3).to_string(), "3");
    }
}
