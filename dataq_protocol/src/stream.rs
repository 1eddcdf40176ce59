use crate::protocol::{expect_magic, read_u32s, FrameError, DQ_ADCDATA};
use log::{debug, warn};

pub const STREAM_HEADER_LEN: usize = 20;

/// One streamed datagram worth of raw ADC counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBatch {
    pub group_id: u32,
    /// Per-datagram sequence number assigned by the device
    pub order: u32,
    /// Samples the device had sent before this batch
    pub cumulative_count: u32,
    pub samples: Vec<i16>,
}

impl SampleBatch {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Interleaved scan-list frames, one sample per configured channel.
    /// A trailing partial frame is left out.
    pub fn frames(&self, channel_count: usize) -> impl Iterator<Item = &[i16]> {
        self.samples.chunks_exact(channel_count.max(1))
    }

    /// Serialize as the device would, used by the simulator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(STREAM_HEADER_LEN + self.samples.len() * 2);
        for field in [
            DQ_ADCDATA,
            self.group_id,
            self.order,
            self.cumulative_count,
            self.samples.len() as u32,
        ] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Decode a streamed sample datagram. No unit conversion is applied.
pub fn decode(datagram: &[u8]) -> Result<SampleBatch, FrameError> {
    let mut reader = datagram;
    let [marker, group_id, order, cumulative_count, sample_count] = read_u32s::<5>(&mut reader)?;
    expect_magic(DQ_ADCDATA, marker)?;

    // Saturates on targets where the declared size does not fit in usize
    let payload_len = (sample_count as usize)
        .checked_mul(2)
        .unwrap_or(usize::MAX);
    if reader.len() < payload_len {
        return Err(FrameError::Truncated {
            needed: STREAM_HEADER_LEN.saturating_add(payload_len),
            available: datagram.len(),
        });
    }

    let samples = reader[..payload_len]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(SampleBatch {
        group_id,
        order,
        cumulative_count,
        samples,
    })
}

/// A discontinuity between two consecutive batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub expected_order: u32,
    pub found_order: u32,
    /// Samples missing between the two batches (zero when only the order skipped)
    pub missing_samples: u32,
}

/// Watches batch order and cumulative counts for dropped datagrams
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<(u32, u32)>,
    gaps: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, batch: &SampleBatch) -> Option<SequenceGap> {
        let next_cumulative = batch
            .cumulative_count
            .wrapping_add(batch.samples.len() as u32);
        let previous = self.last.replace((batch.order, next_cumulative));

        let (last_order, expected_cumulative) = previous?;
        let expected_order = last_order.wrapping_add(1);

        if batch.order == expected_order && batch.cumulative_count == expected_cumulative {
            debug!("Batch {} in sequence", batch.order);
            return None;
        }

        let gap = SequenceGap {
            expected_order,
            found_order: batch.order,
            missing_samples: batch.cumulative_count.saturating_sub(expected_cumulative),
        };
        self.gaps += 1;
        warn!(
            "⚠️ Stream discontinuity: expected batch {}, got {} ({} samples missing)",
            gap.expected_order, gap.found_order, gap.missing_samples
        );

        Some(gap)
    }

    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
