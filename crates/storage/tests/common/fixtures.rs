use bytes::Bytes;
use futures::Stream;

/// Generate deterministic test data using a seeded pseudo-random generator.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split `data` into a stream of `chunk_size` pieces.
#[allow(dead_code)]
pub fn chunked(
    data: Bytes,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin {
    let pieces: Vec<_> = (0..data.len())
        .step_by(chunk_size.max(1))
        .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
        .collect();
    futures::stream::iter(pieces)
}
