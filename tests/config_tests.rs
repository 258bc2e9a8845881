use mesh_cluster::balance::BalancerConfig;
use mesh_cluster::cluster::{AdvanceMode, BergerRigoutsos, ClusterConfig, MinBoxCheck, OwnerMode};
use mesh_cluster::algs::communicator::NoComm;
use mesh_cluster::geometry::{Dimension, IntVector};
use mesh_cluster::mesh_error::MeshError;

#[test]
fn defaults_survive_a_json_round_trip() {
    let cfg = ClusterConfig::default();
    let text = serde_json::to_string(&cfg).unwrap();
    assert!(text.contains("\"ADVANCE_SOME\""));
    assert!(text.contains("\"MOST_OVERLAP\""));
    let back: ClusterConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, cfg);
}

#[test]
fn partial_input_keeps_defaults() {
    let cfg: ClusterConfig =
        serde_json::from_str(r#"{ "owner_mode": "SINGLE_OWNER", "barrier_after": true }"#).unwrap();
    assert_eq!(cfg.owner_mode, OwnerMode::SingleOwner);
    assert!(cfg.barrier_after);
    assert_eq!(cfg.algo_advance_mode, AdvanceMode::AdvanceSome);
    assert_eq!(cfg.check_min_box_size, MinBoxCheck::Warn);
}

#[test]
fn unknown_options_and_values_are_rejected() {
    assert!(serde_json::from_str::<ClusterConfig>(r#"{ "owner_mod": "SINGLE_OWNER" }"#).is_err());
    assert!(serde_json::from_str::<ClusterConfig>(r#"{ "owner_mode": "RANDOM" }"#).is_err());
    assert!(serde_json::from_str::<BalancerConfig>(r#"{ "tolerance": 0.1 }"#).is_err());
}

#[test]
fn out_of_range_values_fail_construction() {
    let dim = Dimension::new(2).unwrap();
    let cfg = ClusterConfig {
        max_lap_cut_from_center: 1.5,
        ..ClusterConfig::default()
    };
    let err = BergerRigoutsos::<NoComm>::new(dim, cfg).unwrap_err();
    assert!(matches!(err, MeshError::InvalidConfig { option: "max_lap_cut_from_center", .. }));

    let cfg = ClusterConfig {
        max_box_size: Some(IntVector::new(&[8, 8, 8])),
        ..ClusterConfig::default()
    };
    assert!(matches!(
        BergerRigoutsos::<NoComm>::new(dim, cfg),
        Err(MeshError::DimensionMismatch { expected: 2, got: 3 })
    ));
}

#[test]
fn balancer_config_parses() {
    let cfg: BalancerConfig = serde_json::from_str(
        r#"{ "workload_data_levels": [1, 2], "flexible_load_tolerance": 0.2 }"#,
    )
    .unwrap();
    assert_eq!(cfg.workload_data_levels, vec![1, 2]);
    assert_eq!(cfg.flexible_load_tolerance, 0.2);
    assert!(!cfg.report_load_balance);
}
