//! Small collectives built from point-to-point messages.
//!
//! Each collective posts every receive, then every send, then drains all
//! handles before reporting the first error, so a failure on one peer never
//! leaves unmatched traffic behind. Messages between a pair of ranks on one
//! tag are delivered in order, so back-to-back collectives on the same tag
//! are safe.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{Decoder, Encoder};
use crate::mesh_error::MeshError;
use bytemuck::Pod;

/// Every rank contributes `local`; returns all contributions indexed by rank.
pub fn all_gather_bytes<C: Communicator>(
    comm: &C,
    tag: CommTag,
    local: &[u8],
) -> Result<Vec<Vec<u8>>, MeshError> {
    let me = comm.rank();
    let n = comm.size();
    if n == 1 {
        return Ok(vec![local.to_vec()]);
    }

    // 1) post all receives
    let recvs: Vec<(usize, C::RecvHandle)> = (0..n)
        .filter(|&r| r != me)
        .map(|r| (r, comm.irecv(r, tag.as_u16())))
        .collect();

    // 2) post all sends
    let sends: Vec<C::SendHandle> = (0..n)
        .filter(|&r| r != me)
        .map(|r| comm.isend(r, tag.as_u16(), local))
        .collect();

    // 3) wait for all recvs (but do not early-return)
    let mut out = vec![Vec::new(); n];
    out[me] = local.to_vec();
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) => out[peer] = data,
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: peer,
                    reason: format!("no contribution received on tag {:#x}", tag.as_u16()),
                });
            }
            None => {}
        }
    }

    // 4) always drain sends
    for s in sends {
        let _ = s.wait();
    }

    match maybe_err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Typed all-gather of `Pod` records; contributions may differ in length.
pub fn all_gather<C: Communicator, T: Pod>(
    comm: &C,
    tag: CommTag,
    local: &[T],
) -> Result<Vec<Vec<T>>, MeshError> {
    let mut enc = Encoder::new();
    enc.put_counted(local);
    let parts = all_gather_bytes(comm, tag, &enc.finish())?;
    parts
        .iter()
        .enumerate()
        .map(|(peer, bytes)| {
            let mut dec = Decoder::new(bytes);
            let v = dec.take_counted::<T>()?;
            dec.finish().map_err(|e| MeshError::CommError {
                neighbor: peer,
                reason: e.to_string(),
            })?;
            Ok(v)
        })
        .collect()
}

/// All-gather of one `f64` per rank.
pub fn all_gather_f64<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: f64,
) -> Result<Vec<f64>, MeshError> {
    let parts = all_gather(comm, tag, &[value.to_bits().to_le()])?;
    parts
        .into_iter()
        .enumerate()
        .map(|(peer, v)| match v.as_slice() {
            [bits] => Ok(f64::from_bits(u64::from_le(*bits))),
            _ => Err(MeshError::CommError {
                neighbor: peer,
                reason: format!("expected one value, got {}", v.len()),
            }),
        })
        .collect()
}

/// Global sum of one `u64` per rank.
pub fn all_reduce_sum_u64<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<u64, MeshError> {
    let parts = all_gather(comm, tag, &[value.to_le()])?;
    Ok(parts.iter().flatten().map(|v| u64::from_le(*v)).sum())
}

/// Returns once every rank has entered.
pub fn barrier<C: Communicator>(comm: &C, tag: CommTag) -> Result<(), MeshError> {
    all_gather_bytes(comm, tag, &[]).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use std::thread;

    const TAG: CommTag = CommTag::new(0x77);

    #[test]
    fn single_rank_is_identity() {
        let got = all_gather(&NoComm, TAG, &[1u32, 2]).unwrap();
        assert_eq!(got, vec![vec![1, 2]]);
        assert_eq!(all_reduce_sum_u64(&NoComm, TAG, 5).unwrap(), 5);
    }

    #[test]
    fn gather_ragged_contributions() {
        let handles: Vec<_> = ThreadComm::world(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let r = comm.rank() as u32;
                    let local: Vec<u32> = (0..=r).collect();
                    let first = all_gather(&comm, TAG, &local).unwrap();
                    // second round on the same tag must not mix with the first
                    let second = all_gather_f64(&comm, TAG, f64::from(r) * 0.5).unwrap();
                    barrier(&comm, TAG).unwrap();
                    (first, second)
                })
            })
            .collect();
        for h in handles {
            let (first, second) = h.join().unwrap();
            assert_eq!(first, vec![vec![0], vec![0, 1], vec![0, 1, 2]]);
            assert_eq!(second, vec![0.0, 0.5, 1.0]);
        }
    }
}
