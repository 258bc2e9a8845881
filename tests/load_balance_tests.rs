mod util;

use mesh_cluster::algs::communicator::{CommTag, Communicator, ThreadComm};
use mesh_cluster::balance::{
    BalanceConstraints, BalancerConfig, CellWorkload, GreedyLoadBalancer, LoadBalanceStrategy,
    UniformWorkload, WorkloadSource,
};
use mesh_cluster::geometry::{BlockId, Dimension, IndexBox, IntVector};
use mesh_cluster::level::{BoxLevel, Connector, MappedBox, RankGroup};
use mesh_cluster::mesh_error::MeshError;
use util::{assert_exact_cover, bx, on_ranks};

const CHECK: CommTag = CommTag::new(0x7200);

struct Setup {
    level: BoxLevel,
    b2a: Connector,
    a2b: Connector,
    domain: BoxLevel,
}

/// Rank 0 owns every box of `boxes`; the anchor level is the same boxes,
/// also on rank 0, linked one to one.
fn setup(comm: &ThreadComm, boxes: &[IndexBox]) -> Setup {
    let dim = boxes[0].dim();
    let ratio = IntVector::one(dim);
    let mut level = BoxLevel::for_comm(ratio, comm);
    let mut anchor = BoxLevel::for_comm(ratio, comm);
    let mut b2a = Connector::new(IntVector::zero(dim));
    let mut a2b = Connector::new(IntVector::zero(dim));
    let mut domain = BoxLevel::new(ratio, 0, 1);
    for b in boxes {
        domain.add_box(*b, BlockId(0));
        if comm.rank() == 0 {
            let mb = level.add_box(*b, BlockId(0));
            let a = anchor.add_box(*b, BlockId(0));
            b2a.add_edge(mb.id, a);
            a2b.add_edge(a.id, mb);
        }
    }
    Setup {
        level,
        b2a,
        a2b,
        domain,
    }
}

fn balance(
    s: &mut Setup,
    lb: &mut GreedyLoadBalancer,
    workload: &dyn WorkloadSource,
    level_number: usize,
    constraints: &BalanceConstraints,
    group: &RankGroup,
    comm: &ThreadComm,
) -> Result<(), MeshError> {
    lb.load_balance_box_level(
        &mut s.level,
        &mut s.b2a,
        &mut s.a2b,
        workload,
        level_number,
        None,
        constraints,
        &s.domain,
        group,
        comm,
    )
}

fn dim2() -> Dimension {
    Dimension::new(2).unwrap()
}

#[test]
fn square_domain_spreads_evenly_over_four_ranks() {
    let domain = bx(&[0, 0], &[99, 99]);
    let per_rank = on_ranks(4, |comm| {
        let mut s = setup(&comm, &[domain]);
        let mut lb = GreedyLoadBalancer::new(BalancerConfig::default()).unwrap();
        let constraints = BalanceConstraints::new(dim2())
            .with_min_size(IntVector::new(&[10, 10]))
            .with_max_size(IntVector::new(&[50, 50]));
        balance(
            &mut s,
            &mut lb,
            &UniformWorkload::default(),
            0,
            &constraints,
            &RankGroup::all(),
            &comm,
        )
        .unwrap();
        Connector::check_transpose(&s.b2a, &s.a2b, &comm, CHECK).unwrap();
        assert!(s.level.local_boxes().all(|b| b.owner() == comm.rank()));
        s.level.local_boxes().copied().collect::<Vec<MappedBox>>()
    });
    for boxes in &per_rank {
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].bx.size(), 2500);
    }
    assert_exact_cover(&per_rank.concat(), &domain, &[domain]);
}

#[test]
fn subgroup_receives_all_the_work() {
    let domain = bx(&[0, 0], &[63, 31]);
    let per_rank = on_ranks(4, |comm| {
        let mut s = setup(&comm, &[domain]);
        let mut lb = GreedyLoadBalancer::new(BalancerConfig::default()).unwrap();
        let constraints = BalanceConstraints::new(dim2()).with_max_size(IntVector::new(&[32, 32]));
        let group = RankGroup::from_ranks(vec![2, 1]);
        balance(
            &mut s,
            &mut lb,
            &UniformWorkload::default(),
            0,
            &constraints,
            &group,
            &comm,
        )
        .unwrap();
        Connector::check_transpose(&s.b2a, &s.a2b, &comm, CHECK).unwrap();
        s.level.local_cell_count()
    });
    assert_eq!(per_rank, vec![0, 1024, 1024, 0]);
}

#[test]
fn data_driven_workload_moves_the_cut() {
    let domain = bx(&[0, 0], &[15, 3]);
    let per_rank = on_ranks(2, |comm| {
        let mut s = setup(&comm, &[domain]);
        let config = BalancerConfig {
            workload_data_levels: vec![1],
            ..BalancerConfig::default()
        };
        let mut lb = GreedyLoadBalancer::new(config).unwrap();
        assert!(LoadBalanceStrategy::<ThreadComm>::load_balance_depends_on_patch_data(&lb, 1));
        assert!(!LoadBalanceStrategy::<ThreadComm>::load_balance_depends_on_patch_data(&lb, 0));
        // the left quarter is three times as heavy
        let heavy_left =
            CellWorkload::new(|_, cell: &IntVector| if cell[0] < 4 { 3.0 } else { 1.0 });
        balance(
            &mut s,
            &mut lb,
            &heavy_left,
            1,
            &BalanceConstraints::new(dim2()),
            &RankGroup::all(),
            &comm,
        )
        .unwrap();
        s.level.local_boxes().map(|b| b.bx).collect::<Vec<_>>()
    });
    // 48 of the 96 units sit in x < 4, so the single cut lands there
    assert_eq!(
        per_rank,
        vec![vec![bx(&[0, 0], &[3, 3])], vec![bx(&[4, 0], &[15, 3])]]
    );
}

#[test]
fn mismatched_calls_are_detected_on_every_rank() {
    let domain = bx(&[0, 0], &[15, 15]);
    let errors = on_ranks(3, |comm| {
        let mut s = setup(&comm, &[domain]);
        let mut lb = GreedyLoadBalancer::new(BalancerConfig::default()).unwrap();
        let level_number = if comm.rank() == 2 { 1 } else { 0 };
        balance(
            &mut s,
            &mut lb,
            &UniformWorkload::default(),
            level_number,
            &BalanceConstraints::new(dim2()),
            &RankGroup::all(),
            &comm,
        )
        .unwrap_err()
    });
    assert!(errors
        .iter()
        .all(|e| matches!(e, MeshError::CollectiveMismatch { .. })));
}

#[test]
fn invalid_rank_group_is_rejected() {
    on_ranks(2, |comm| {
        let mut s = setup(&comm, &[bx(&[0, 0], &[3, 3])]);
        let mut lb = GreedyLoadBalancer::new(BalancerConfig::default()).unwrap();
        let err = balance(
            &mut s,
            &mut lb,
            &UniformWorkload::default(),
            0,
            &BalanceConstraints::new(dim2()),
            &RankGroup::from_ranks(vec![5]),
            &comm,
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::InvalidConfig { option: "rank_group", .. }));
    });
}

#[test]
fn balanced_boxes_honor_size_constraints() {
    // the lower corner is off the cut_factor lattice
    let domain = bx(&[2, 1], &[49, 24]);
    let min_size = IntVector::new(&[8, 4]);
    let max_size = IntVector::new(&[16, 12]);
    let per_rank = on_ranks(3, |comm| {
        let mut s = setup(&comm, &[domain]);
        let mut lb = GreedyLoadBalancer::new(BalancerConfig::default()).unwrap();
        let constraints = BalanceConstraints::new(dim2())
            .with_min_size(min_size)
            .with_max_size(max_size)
            .with_cut_factor(IntVector::new(&[4, 4]));
        balance(
            &mut s,
            &mut lb,
            &UniformWorkload::default(),
            0,
            &constraints,
            &RankGroup::all(),
            &comm,
        )
        .unwrap();
        Connector::check_transpose(&s.b2a, &s.a2b, &comm, CHECK).unwrap();
        s.level.local_boxes().copied().collect::<Vec<MappedBox>>()
    });
    let all = per_rank.concat();
    for b in &all {
        let shape = b.bx.shape();
        for axis in 0..2 {
            assert_eq!(shape[axis] % 4, 0, "{b}");
            assert!(shape[axis] >= min_size[axis] && shape[axis] <= max_size[axis], "{b}");
        }
    }
    assert_exact_cover(&all, &domain, &[domain]);
}
