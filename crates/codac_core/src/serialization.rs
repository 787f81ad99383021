//! Binary persistence of sampled trajectories.
//!
//! Wire format, little-endian: `sample_count: u64`, `dim: u32`, then per
//! sample the date as one f64 followed by `dim` f64 components.

use crate::interval::boxes::Vector;
use crate::trajectory::{SampledTraj, TrajValue};
use anyhow::Context;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty trajectory cannot be serialized")]
    EmptyTrajectory,
    #[error("invalid dimension in stream: {0}")]
    BadDimension(u32),
    #[error("non-finite date in stream")]
    BadDate,
}

pub fn serialize_traj<T: TrajValue, W: Write>(
    w: &mut W,
    traj: &SampledTraj<T>,
) -> Result<(), SerializeError> {
    if traj.is_empty() {
        return Err(SerializeError::EmptyTrajectory);
    }
    let dim = traj.size() as u32;
    w.write_all(&(traj.nb_samples() as u64).to_le_bytes())?;
    w.write_all(&dim.to_le_bytes())?;
    for (t, v) in traj.samples() {
        w.write_all(&t.to_le_bytes())?;
        for c in v.scalars() {
            w.write_all(&c.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, SerializeError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, SerializeError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, SerializeError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}

fn deserialize_with_dim<T: TrajValue, R: Read>(
    r: &mut R,
    expected_dim: impl Fn(u32) -> bool,
) -> Result<SampledTraj<T>, SerializeError> {
    let count = read_u64(r)?;
    let dim = read_u32(r)?;
    if dim == 0 || !expected_dim(dim) {
        return Err(SerializeError::BadDimension(dim));
    }
    let mut samples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let t = read_f64(r)?;
        if !t.is_finite() {
            return Err(SerializeError::BadDate);
        }
        let mut comps = Vec::with_capacity(dim as usize);
        for _ in 0..dim {
            comps.push(read_f64(r)?);
        }
        samples.push((t, T::from_scalars(&comps)));
    }
    Ok(SampledTraj::from_samples(samples))
}

pub fn deserialize_scalar_traj<R: Read>(r: &mut R) -> Result<SampledTraj<f64>, SerializeError> {
    deserialize_with_dim(r, |d| d == 1)
}

pub fn deserialize_vector_traj<R: Read>(r: &mut R) -> Result<SampledTraj<Vector>, SerializeError> {
    deserialize_with_dim(r, |_| true)
}

/// File-level convenience around the binary codec.
pub fn save_traj_to_file<T: TrajValue>(
    path: impl AsRef<Path>,
    traj: &SampledTraj<T>,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let mut f = std::fs::File::create(path)
        .with_context(|| format!("cannot create trajectory file {}", path.display()))?;
    serialize_traj(&mut f, traj)
        .with_context(|| format!("cannot serialize trajectory to {}", path.display()))?;
    Ok(())
}

pub fn load_scalar_traj_from_file(path: impl AsRef<Path>) -> anyhow::Result<SampledTraj<f64>> {
    let path = path.as_ref();
    let mut f = std::fs::File::open(path)
        .with_context(|| format!("cannot open trajectory file {}", path.display()))?;
    deserialize_scalar_traj(&mut f)
        .with_context(|| format!("malformed trajectory file {}", path.display()))
}

pub fn load_vector_traj_from_file(path: impl AsRef<Path>) -> anyhow::Result<SampledTraj<Vector>> {
    let path = path.as_ref();
    let mut f = std::fs::File::open(path)
        .with_context(|| format!("cannot open trajectory file {}", path.display()))?;
    deserialize_vector_traj(&mut f)
        .with_context(|| format!("malformed trajectory file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_stream_layout() {
        let traj = SampledTraj::from_samples(vec![(0.0, 1.5), (1.0, -2.0)]);
        let mut buf = Vec::new();
        serialize_traj(&mut buf, &traj).unwrap();
        // count + dim + 2 * (t + 1 component)
        assert_eq!(buf.len(), 8 + 4 + 2 * 16);
        assert_eq!(u64::from_le_bytes(buf[0..8].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 1);
        assert_eq!(f64::from_le_bytes(buf[12..20].try_into().unwrap()), 0.0);
        assert_eq!(f64::from_le_bytes(buf[20..28].try_into().unwrap()), 1.5);

        let back = deserialize_scalar_traj(&mut buf.as_slice()).unwrap();
        assert_eq!(back, traj);
    }

    #[test]
    fn vector_stream_roundtrip() {
        let traj = SampledTraj::from_samples(vec![
            (0.25, Vector::from_vec(vec![-0.5, 0.5])),
            (1.0, Vector::from_vec(vec![0.0, 0.0])),
            (2.0, Vector::from_vec(vec![1.0, 0.0])),
        ]);
        let mut buf = Vec::new();
        serialize_traj(&mut buf, &traj).unwrap();
        let back = deserialize_vector_traj(&mut buf.as_slice()).unwrap();
        assert_eq!(back, traj);
        assert_eq!(back.size(), 2);
    }

    #[test]
    fn malformed_streams_are_rejected() {
        let empty: SampledTraj<f64> = SampledTraj::new();
        let mut buf = Vec::new();
        assert!(matches!(
            serialize_traj(&mut buf, &empty),
            Err(SerializeError::EmptyTrajectory)
        ));

        // truncated stream
        let traj = SampledTraj::from_samples(vec![(0.0, 1.0)]);
        let mut buf = Vec::new();
        serialize_traj(&mut buf, &traj).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            deserialize_scalar_traj(&mut buf.as_slice()),
            Err(SerializeError::Io(_))
        ));

        // wrong dimension for a scalar reader
        let vtraj = SampledTraj::from_samples(vec![(0.0, Vector::from_vec(vec![1.0, 2.0]))]);
        let mut buf = Vec::new();
        serialize_traj(&mut buf, &vtraj).unwrap();
        assert!(matches!(
            deserialize_scalar_traj(&mut buf.as_slice()),
            Err(SerializeError::BadDimension(2))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let dir = std::env::temp_dir().join("codac_core_traj_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("traj.bin");
        let traj = SampledTraj::from_samples(vec![(0.0, 1.0), (0.5, 2.0), (1.0, 0.0)]);
        save_traj_to_file(&path, &traj).unwrap();
        let back = load_scalar_traj_from_file(&path).unwrap();
        assert_eq!(back, traj);
        std::fs::remove_file(&path).ok();
    }
}
