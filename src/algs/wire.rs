//! Fixed, versioned, little-endian wire types for the mesh exchange.
//!
//! Every message is a [`WireHdr`] followed by records. The header carries the
//! record kind and count, so a receiver never has to assume how many
//! components a point or a field element has.

use crate::{Face, Label, Point};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_LABELS: u16 = 1;
pub const KIND_FACES: u16 = 2;
pub const KIND_POINTS: u16 = 3;
pub const KIND_SCALARS: u16 = 4;

/// All multi-byte integers in these structs are **little-endian** on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    /// Number of records following the header (faces: number of faces).
    pub n_le: u32,
}

impl WireHdr {
    /// Fails if `n` does not fit the 32-bit record count.
    pub fn new(kind: u16, n: usize) -> Result<Self, String> {
        let n = u32::try_from(n).map_err(|_| format!("{n} records exceed the wire header count"))?;
        Ok(Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            n_le: n.to_le(),
        })
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn len(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireLabel(pub i64);

impl WireLabel {
    pub fn of(v: Label) -> Self {
        WireLabel(v.to_le())
    }
    pub fn get(self) -> Label {
        i64::from_le(self.0)
    }
}

/// A 3-component point, stored as raw IEEE bits.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePoint {
    pub xyz_le: [u64; 3],
}

impl WirePoint {
    pub fn of(p: &Point) -> Self {
        Self {
            xyz_le: p.map(|c| c.to_bits().to_le()),
        }
    }
    pub fn get(&self) -> Point {
        self.xyz_le.map(|b| f64::from_bits(u64::from_le(b)))
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireLabel>(), 8);
const_assert_eq!(size_of::<WirePoint>(), 3 * size_of::<f64>());

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

fn with_header(kind: u16, n: usize, body: &[u8]) -> Result<Vec<u8>, String> {
    let hdr = WireHdr::new(kind, n)?;
    let mut out = Vec::with_capacity(size_of::<WireHdr>() + body.len());
    out.extend_from_slice(bytemuck::bytes_of(&hdr));
    out.extend_from_slice(body);
    Ok(out)
}

/// Split off and check the header; returns `(n, body)`.
fn split_header(kind: u16, bytes: &[u8]) -> Result<(usize, &[u8]), String> {
    let hl = size_of::<WireHdr>();
    if bytes.len() < hl {
        return Err(format!("message of {} bytes has no header", bytes.len()));
    }
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..hl]);
    if hdr.version() != WIRE_VERSION {
        return Err(format!("wire version {} (expected {WIRE_VERSION})", hdr.version()));
    }
    if hdr.kind() != kind {
        return Err(format!("record kind {} (expected {kind})", hdr.kind()));
    }
    Ok((hdr.len(), &bytes[hl..]))
}

fn labels_body(v: &[Label]) -> Vec<u8> {
    let w: Vec<WireLabel> = v.iter().copied().map(WireLabel::of).collect();
    bytemuck::cast_slice(&w).to_vec()
}

fn read_labels(body: &[u8]) -> Vec<Label> {
    body.chunks_exact(size_of::<WireLabel>())
        .map(|c| bytemuck::pod_read_unaligned::<WireLabel>(c).get())
        .collect()
}

pub fn encode_labels(v: &[Label]) -> Result<Vec<u8>, String> {
    with_header(KIND_LABELS, v.len(), &labels_body(v))
}

pub fn decode_labels(bytes: &[u8]) -> Result<Vec<Label>, String> {
    let (n, body) = split_header(KIND_LABELS, bytes)?;
    expect_exact_len(body.len(), n * size_of::<WireLabel>())?;
    Ok(read_labels(body))
}

/// Faces go as `n` sizes followed by the flat point ids.
pub fn encode_faces(faces: &[Face]) -> Result<Vec<u8>, String> {
    let mut flat: Vec<Label> = faces.iter().map(|f| f.len() as Label).collect();
    flat.extend(faces.iter().flatten().copied());
    with_header(KIND_FACES, faces.len(), &labels_body(&flat))
}

pub fn decode_faces(bytes: &[u8]) -> Result<Vec<Face>, String> {
    let (n, body) = split_header(KIND_FACES, bytes)?;
    if body.len() % size_of::<WireLabel>() != 0 || body.len() < n * size_of::<WireLabel>() {
        return Err(format!("face body of {} bytes for {n} faces", body.len()));
    }
    let flat = read_labels(body);
    let (sizes, mut rest) = flat.split_at(n);
    let mut faces = Vec::with_capacity(n);
    for &s in sizes {
        let s = usize::try_from(s).map_err(|_| format!("negative face size {s}"))?;
        if s > rest.len() {
            return Err(format!("face of size {s} overruns message"));
        }
        let (face, tail) = rest.split_at(s);
        faces.push(face.to_vec());
        rest = tail;
    }
    expect_exact_len(rest.len(), 0)?;
    Ok(faces)
}

pub fn encode_points(points: &[Point]) -> Result<Vec<u8>, String> {
    let w: Vec<WirePoint> = points.iter().map(WirePoint::of).collect();
    with_header(KIND_POINTS, points.len(), bytemuck::cast_slice(&w))
}

pub fn decode_points(bytes: &[u8]) -> Result<Vec<Point>, String> {
    let (n, body) = split_header(KIND_POINTS, bytes)?;
    expect_exact_len(body.len(), n * size_of::<WirePoint>())?;
    Ok(body
        .chunks_exact(size_of::<WirePoint>())
        .map(|c| bytemuck::pod_read_unaligned::<WirePoint>(c).get())
        .collect())
}

pub fn encode_scalars(v: &[f64]) -> Result<Vec<u8>, String> {
    let bits: Vec<u64> = v.iter().map(|x| x.to_bits().to_le()).collect();
    with_header(KIND_SCALARS, v.len(), bytemuck::cast_slice(&bits))
}

pub fn decode_scalars(bytes: &[u8]) -> Result<Vec<f64>, String> {
    let (n, body) = split_header(KIND_SCALARS, bytes)?;
    expect_exact_len(body.len(), n * size_of::<u64>())?;
    Ok(body
        .chunks_exact(size_of::<u64>())
        .map(|c| f64::from_bits(u64::from_le(bytemuck::pod_read_unaligned(c))))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ragged_faces_survive() {
        let faces = vec![vec![0, 1, 2], vec![], vec![7, 3, 5, 9]];
        assert_eq!(decode_faces(&encode_faces(&faces).unwrap()).unwrap(), faces);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let bytes = encode_labels(&[1, 2, 3]).unwrap();
        let err = decode_points(&bytes).unwrap_err();
        assert!(err.contains("kind"), "{err}");
    }

    #[test]
    fn truncated_points_are_rejected() {
        let mut bytes = encode_points(&[[1.0, 2.0, 3.0]]).unwrap();
        bytes.pop();
        assert!(decode_points(&bytes).is_err());
    }

    #[test]
    fn unaligned_buffers_decode() {
        let mut bytes = vec![0u8];
        bytes.extend(encode_scalars(&[1.5, -2.0]).unwrap());
        assert_eq!(decode_scalars(&bytes[1..]).unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(KIND_LABELS, 0).unwrap();
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert!(hdr.is_empty());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn counts_beyond_u32_are_refused() {
        let max = u32::MAX as usize;
        assert_eq!(WireHdr::new(KIND_SCALARS, max).unwrap().len(), max);
        let err = WireHdr::new(KIND_SCALARS, max + 1).unwrap_err();
        assert!(err.contains("exceed"), "{err}");
    }
}
