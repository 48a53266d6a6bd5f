//! Vector blob encoding: little-endian f32 components, dimension stored separately.

const F32_BYTES: usize = std::mem::size_of::<f32>();

pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * F32_BYTES);
    for component in vector {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
    bytes
}

/// Decode a blob tagged with `dim` components. `None` if the lengths disagree.
pub fn decode(bytes: &[u8], dim: usize) -> Option<Vec<f32>> {
    if bytes.len() != dim.checked_mul(F32_BYTES)? {
        return None;
    }
    Some(
        bytes
            .chunks_exact(F32_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
