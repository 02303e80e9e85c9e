//! Framing must not depend on how the transport chunks the byte stream.

use scale_daq::protocol::{Classification, LineClassifier, LineFramer};

const STREAM: &str = concat!(
    "Arduino listo.\r\n",
    "{\"peso\":12.340,\"objetivo\":12.000,\"diferencia\":0.340}\n",
    "Coloque el peso conocido\n",
    "OBJ:10.000;ACT:10.003;DIF:0.003\n",
    "Báscula ñandú 5 kg\n",
    "HEARTBEAT\n",
    "tail without terminator"
);

fn frame_all(chunks: &[&[u8]]) -> (Vec<String>, String) {
    let mut framer = LineFramer::new();
    let mut lines = Vec::new();
    for chunk in chunks {
        lines.extend(framer.push(chunk));
    }
    (lines, framer.remainder().to_string())
}

fn reference() -> (Vec<String>, String) {
    frame_all(&[STREAM.as_bytes()])
}

/// Deterministic pseudo-random chunk sizes in `1..=max`.
fn chunk_sizes(seed: u64, max: usize) -> impl Iterator<Item = usize> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    std::iter::repeat_with(move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as usize % max + 1
    })
}

#[test]
fn reference_stream_lines() {
    let (lines, remainder) = reference();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "Arduino listo.");
    assert_eq!(lines[4], "Báscula ñandú 5 kg");
    assert_eq!(remainder, "tail without terminator");
}

#[test]
fn every_two_way_split_gives_the_same_lines() {
    let bytes = STREAM.as_bytes();
    let expected = reference();
    for split in 0..=bytes.len() {
        let (head, tail) = bytes.split_at(split);
        assert_eq!(frame_all(&[head, tail]), expected, "split at byte {split}");
    }
}

#[test]
fn single_byte_chunks_give_the_same_lines() {
    let bytes = STREAM.as_bytes();
    let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
    assert_eq!(frame_all(&chunks), reference());
}

#[test]
fn random_chunkings_give_the_same_lines() {
    let bytes = STREAM.as_bytes();
    let expected = reference();
    for seed in 0..200 {
        let mut chunks = Vec::new();
        let mut offset = 0;
        for size in chunk_sizes(seed, 17) {
            if offset >= bytes.len() {
                break;
            }
            let end = (offset + size).min(bytes.len());
            chunks.push(&bytes[offset..end]);
            offset = end;
        }
        assert_eq!(frame_all(&chunks), expected, "seed {seed}");
    }
}

#[test]
fn classification_is_chunking_independent() {
    let classifier = LineClassifier::default();
    let classify_all = |lines: Vec<String>| -> Vec<Classification> {
        lines.iter().map(|line| classifier.classify(line)).collect()
    };

    let (whole, _) = reference();
    let bytes = STREAM.as_bytes();
    let chunks: Vec<&[u8]> = bytes.chunks(3).collect();
    let (split, _) = frame_all(&chunks);

    let whole = classify_all(whole);
    assert_eq!(whole, classify_all(split));
    let measurements = whole
        .iter()
        .filter(|c| matches!(c, Classification::Measurement(_)))
        .count();
    assert_eq!(measurements, 2);
}
