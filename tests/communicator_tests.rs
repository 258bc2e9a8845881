mod util;

use mesh_cluster::algs::collective;
use mesh_cluster::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
use util::on_ranks;

#[test]
fn thread_round_trip() {
    let tag = CommTag(0x1000);
    let mut world = ThreadComm::world(2);
    let c1 = world.pop().unwrap();
    let c0 = world.pop().unwrap();

    c0.isend(1, tag.as_u16(), b"hello");
    let got = c1.irecv(0, tag.as_u16()).wait().unwrap();
    assert_eq!(&got, b"hello");
}

#[test]
fn thread_fifo_order() {
    let tag = CommTag(0x1001);
    let mut world = ThreadComm::world(2);
    let c1 = world.pop().unwrap();
    let c0 = world.pop().unwrap();

    for i in 0..10u8 {
        c0.isend(1, tag.as_u16(), &[i]);
    }
    let out: Vec<u8> = (0..10)
        .map(|_| c1.irecv(0, tag.as_u16()).wait().unwrap()[0])
        .collect();
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn tags_do_not_mix() {
    let mut world = ThreadComm::world(2);
    let c1 = world.pop().unwrap();
    let c0 = world.pop().unwrap();

    c0.isend(1, 5, &[5]);
    c0.isend(1, 6, &[6]);
    assert_eq!(c1.irecv(0, 6).wait().unwrap(), vec![6]);
    assert_eq!(c1.try_recv_any(5), Some((0, vec![5])));
    assert_eq!(c1.try_recv_any(5), None);
}

#[test]
fn no_comm_is_a_single_rank() {
    assert_eq!((NoComm.rank(), NoComm.size()), (0, 1));
    assert!(NoComm.is_congruent(&NoComm.duplicate()));
    let parts = collective::all_gather(&NoComm, CommTag(1), &[7u32, 8]).unwrap();
    assert_eq!(parts, vec![vec![7, 8]]);
}

#[test]
fn all_gather_over_threads() {
    let got = on_ranks(4, |comm| {
        let mine = vec![comm.rank() as u64; comm.rank() + 1];
        collective::all_gather(&comm, CommTag(0x20), &mine).unwrap()
    });
    for parts in &got {
        for (r, p) in parts.iter().enumerate() {
            assert_eq!(p, &vec![r as u64; r + 1]);
        }
    }
    assert!(got.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn sums_and_barriers_agree() {
    let sums = on_ranks(3, |comm| {
        collective::barrier(&comm, CommTag(0x30)).unwrap();
        let s = collective::all_reduce_sum_u64(&comm, CommTag(0x31), comm.rank() as u64 + 1)
            .unwrap();
        collective::barrier(&comm, CommTag(0x30)).unwrap();
        s
    });
    assert_eq!(sums, vec![6, 6, 6]);
}

#[test]
fn duplicates_are_congruent_and_isolated() {
    on_ranks(2, |comm| {
        let dup = comm.duplicate();
        assert!(comm.is_congruent(&dup));
        assert_ne!(comm.context(), dup.context());
        let peer = 1 - comm.rank();
        dup.isend(peer, 9, &[1]);
        comm.isend(peer, 9, &[2]);
        assert_eq!(comm.irecv(peer, 9).wait().unwrap(), vec![2]);
        assert_eq!(dup.irecv(peer, 9).wait().unwrap(), vec![1]);
    });
    let a = ThreadComm::world(1).pop().unwrap();
    let b = ThreadComm::world(1).pop().unwrap();
    assert!(!a.is_congruent(&b));
}
