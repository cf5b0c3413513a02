//! Decode stage: frame batches in, decoded messages out

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adsb::{decode_message, DecodedMessage};
use crate::batcher::FrameBatch;
use crate::error::TransportError;
use crate::frame::{unix_seconds, FrameRecord};
use crate::supervisor::WorkerContext;
use crate::transport::{ChannelReceiver, ChannelSender};

/// Records of a batch back in arrival order.
pub fn arrival_order(batch: FrameBatch) -> Vec<FrameRecord> {
    let mut records = batch.adsb;
    records.extend(batch.commb);
    records.sort_by_key(|r| r.received_at());
    records
}

/// Decode one record. Frames the decoder has nothing for yield an error the
/// caller drops.
pub fn decode_record(record: &FrameRecord) -> anyhow::Result<DecodedMessage> {
    let bytes = record.frame().to_bytes()?;
    let message = decode_message(&bytes, unix_seconds(&record.received_at()))
        .with_context(|| format!("decoding {}", record.frame()))?;
    Ok(message)
}

/// Run until the input channel closes.
///
/// A termination request switches the stage to draining: it keeps
/// consuming until the upstream sender is gone, so batches already in
/// flight still reach the display.
pub async fn run(
    mut input: ChannelReceiver<FrameBatch>,
    output: ChannelSender<DecodedMessage>,
    ctx: WorkerContext,
) -> anyhow::Result<()> {
    // sends while draining are bounded by the supervisor's kill deadline
    let never = CancellationToken::new();
    let mut draining = false;
    let mut decoded = 0u64;
    let mut dropped = 0u64;

    loop {
        let batch = tokio::select! {
            biased;
            batch = input.recv() => batch,
            _ = ctx.cancelled(), if !draining => {
                debug!("Decode stage draining");
                draining = true;
                continue;
            }
        };
        let Some(batch) = batch else { break };

        for record in arrival_order(batch) {
            let message = match decode_record(&record) {
                Ok(message) => message,
                Err(e) => {
                    dropped += 1;
                    debug!("{:#}", e);
                    continue;
                }
            };

            match output.send(message, &never).await {
                Ok(()) => decoded += 1,
                Err(TransportError::Closed) if ctx.is_cancelled() => {
                    info!("Display gone during shutdown, {} messages decoded", decoded);
                    return Ok(());
                }
                Err(e) => return Err(e).context("forwarding decoded message"),
            }
        }
    }

    info!("Decode stage done: {} decoded, {} undecodable", decoded, dropped);
    Ok(())
}
