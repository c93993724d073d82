use anyhow::{Context, Result};
use bandwidth_core::framing::{decode_body, FrameReader};
use clap::Args;
use colored::*;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

/// Records decoded per parallel batch
const BATCH_SIZE: usize = 4096;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Recorded packet file, or "-" for standard input
    #[arg(value_name = "FILE")]
    pub input: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub packets: u64,
    /// Bytes above the link layer header
    pub layer2_bytes: u64,
}

/// Read every record from `reader` and total the layer-2-plus bytes.
///
/// Frames are split off sequentially; their bodies are decoded in parallel.
pub fn summarize<R: Read>(reader: R) -> Result<ReplaySummary> {
    let mut frames = FrameReader::new(reader);
    let mut summary = ReplaySummary::default();
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    loop {
        let frame = frames
            .next_frame()
            .with_context(|| format!("Failed to read record {}", summary.packets + batch.len() as u64 + 1))?;
        let done = frame.is_none();
        if let Some(body) = frame {
            batch.push(body);
        }

        if batch.len() == BATCH_SIZE || (done && !batch.is_empty()) {
            let bytes = batch
                .par_iter()
                .map(|body| decode_body(body).map(|metadata| metadata.layer2_plus()))
                .try_reduce(|| 0, |a, b| Ok(a + b))
                .context("Failed to decode record")?;
            summary.packets += batch.len() as u64;
            summary.layer2_bytes += bytes;
            batch.clear();
        }

        if done {
            return Ok(summary);
        }
    }
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let summary = if args.input.as_os_str() == "-" {
        summarize(io::stdin().lock())?
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("Failed to open {}", args.input.display()))?;
        summarize(BufReader::new(file))?
    };

    log::debug!("Replayed {:?}", summary);
    println!("{} {}", "Packets:".bold(), summary.packets);
    println!("{} {}", "Layer 2+ bytes:".bold(), summary.layer2_bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandwidth_core::classify::{DecodedPacket, Layer};
    use bandwidth_core::framing::{FrameWriter, PacketMetadata};
    use chrono::Utc;
    use pnet::util::MacAddr;
    use std::io::Cursor;

    fn record(writer: &mut FrameWriter<Vec<u8>>, total: usize) {
        let packet = DecodedPacket::new(
            total,
            vec![Layer::ethernet(14, MacAddr::zero(), MacAddr::broadcast())],
        );
        writer
            .write(&PacketMetadata::from_packet(&packet, Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_summarize_totals_across_batches() {
        let mut writer = FrameWriter::new(Vec::new());
        for _ in 0..BATCH_SIZE + 10 {
            record(&mut writer, 114);
        }

        let summary = summarize(Cursor::new(writer.into_inner())).unwrap();
        assert_eq!(summary.packets, (BATCH_SIZE + 10) as u64);
        assert_eq!(summary.layer2_bytes, 100 * (BATCH_SIZE + 10) as u64);
    }

    #[test]
    fn test_summarize_empty_input() {
        let summary = summarize(Cursor::new(Vec::new())).unwrap();
        assert_eq!(summary, ReplaySummary::default());
    }

    #[test]
    fn test_summarize_rejects_truncated_record() {
        let mut writer = FrameWriter::new(Vec::new());
        record(&mut writer, 114);
        let mut data = writer.into_inner();
        data.pop();

        assert!(summarize(Cursor::new(data)).is_err());
    }
}
