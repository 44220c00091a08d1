use crate::speck::set::Dims;
use crate::utils::error::{Result, SperrError};

/// A box of a larger volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: [usize; 3],
    pub len: [usize; 3],
}

impl Chunk {
    pub fn dims(&self) -> Dims {
        Dims(self.len)
    }
}

/// Splits `[0, vol)` into `(start, len)` segments of nominal length `chunk`.
/// A remainder longer than half a chunk gets its own segment; a shorter one
/// extends the last segment.
fn segments(vol: usize, chunk: usize) -> Vec<(usize, usize)> {
    let count = segment_count(vol, chunk);
    (0..count)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == count { vol } else { start + chunk };
            (start, end - start)
        })
        .collect()
}

fn segment_count(vol: usize, chunk: usize) -> usize {
    let mut count = vol / chunk;
    if vol % chunk > chunk / 2 {
        count += 1;
    }
    count.max(1)
}

fn check_chunk_dims(vol: Dims, chunk: Dims) -> Result<()> {
    vol.validate()?;
    if chunk.0.contains(&0) {
        return Err(SperrError::InvalidArg(format!(
            "chunk dimensions {:?} contain zero",
            chunk.0
        )));
    }
    Ok(())
}

/// Number of chunks [`chunk_volume`] produces, without building them.
pub fn chunk_count(vol: Dims, chunk: Dims) -> Result<usize> {
    check_chunk_dims(vol, chunk)?;
    Ok((0..3)
        .map(|d| segment_count(vol.0[d], chunk.0[d]))
        .product())
}

/// Chunks covering `vol`, ordered with x varying fastest.
pub fn chunk_volume(vol: Dims, chunk: Dims) -> Result<Vec<Chunk>> {
    check_chunk_dims(vol, chunk)?;
    let xs = segments(vol.nx(), chunk.nx());
    let ys = segments(vol.ny(), chunk.ny());
    let zs = segments(vol.nz(), chunk.nz());
    let mut chunks = Vec::with_capacity(xs.len() * ys.len() * zs.len());
    for &(z0, nz) in &zs {
        for &(y0, ny) in &ys {
            for &(x0, nx) in &xs {
                chunks.push(Chunk {
                    start: [x0, y0, z0],
                    len: [nx, ny, nz],
                });
            }
        }
    }
    Ok(chunks)
}

/// Copies one chunk out of a volume.
pub fn gather_chunk(data: &[f64], vol: Dims, chunk: &Chunk) -> Vec<f64> {
    let [x0, y0, z0] = chunk.start;
    let [nx, ny, nz] = chunk.len;
    let mut out = Vec::with_capacity(nx * ny * nz);
    for z in z0..z0 + nz {
        for y in y0..y0 + ny {
            let row = vol.index(x0, y, z);
            out.extend_from_slice(&data[row..row + nx]);
        }
    }
    out
}

/// Writes a chunk's values back into the volume.
pub fn scatter_chunk(data: &mut [f64], vol: Dims, chunk: &Chunk, values: &[f64]) {
    let [x0, y0, z0] = chunk.start;
    let [nx, ny, _] = chunk.len;
    let rows = values.chunks_exact(nx);
    let coords = (z0..z0 + chunk.len[2]).flat_map(|z| (y0..y0 + ny).map(move |y| (y, z)));
    for ((y, z), row) in coords.zip(rows) {
        let start = vol.index(x0, y, z);
        data[start..start + nx].copy_from_slice(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(segments(10, 4), vec![(0, 4), (4, 6)]);
        assert_eq!(segments(11, 4), vec![(0, 4), (4, 4), (8, 3)]);
        assert_eq!(segments(3, 8), vec![(0, 3)]);
        assert_eq!(segments(8, 4), vec![(0, 4), (4, 4)]);
    }

    #[test]
    fn test_chunk_volume_order_and_cover() {
        let vol = Dims::new_3d(10, 5, 3);
        let chunks = chunk_volume(vol, Dims::new_3d(4, 5, 2)).unwrap();
        assert_eq!(chunks.len(), 2 * 1 * 1);
        assert_eq!(chunks[0].start, [0, 0, 0]);
        assert_eq!(chunks[0].len, [4, 5, 3]);
        assert_eq!(chunks[1].start, [4, 0, 0]);
        assert_eq!(chunks[1].len, [6, 5, 3]);
        let total: usize = chunks.iter().map(|c| c.dims().len()).sum();
        assert_eq!(total, vol.len());

        assert!(chunk_volume(vol, Dims::new_3d(4, 0, 2)).is_err());
    }

    #[test]
    fn test_chunk_count_matches_chunks() {
        for (vol, chunk) in [
            (Dims::new_3d(10, 5, 3), Dims::new_3d(4, 5, 2)),
            (Dims::new_3d(33, 20, 9), Dims::new_3d(16, 16, 8)),
            (Dims::new_3d(64, 64, 64), Dims::new_3d(7, 9, 30)),
        ] {
            assert_eq!(
                chunk_count(vol, chunk).unwrap(),
                chunk_volume(vol, chunk).unwrap().len()
            );
        }
        assert_eq!(chunk_count(Dims::new_3d(1 << 30, 1 << 20, 1), Dims::new_3d(1, 1, 1)).unwrap(), 1 << 50);
        assert!(chunk_count(Dims::new_3d(4, 4, 4), Dims::new_3d(0, 1, 1)).is_err());
    }

    #[test]
    fn test_gather_scatter() {
        let vol = Dims::new_3d(6, 4, 3);
        let data: Vec<f64> = (0..vol.len()).map(|i| i as f64).collect();
        let mut rebuilt = vec![0.0; vol.len()];
        for chunk in chunk_volume(vol, Dims::new_3d(3, 3, 2)).unwrap() {
            let values = gather_chunk(&data, vol, &chunk);
            assert_eq!(values.len(), chunk.dims().len());
            assert_eq!(values[0], vol.index(chunk.start[0], chunk.start[1], chunk.start[2]) as f64);
            scatter_chunk(&mut rebuilt, vol, &chunk, &values);
        }
        assert_eq!(rebuilt, data);
    }
}
