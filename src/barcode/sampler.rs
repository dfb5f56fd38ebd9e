use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::camera::FrameSource;
use crate::error::CaptureError;

use super::{BarcodeDecoder, DecodedSymbol, Symbology};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Samples frames from `source` until a symbol of an accepted symbology is
/// decoded, the token is cancelled, or the stream goes away.
///
/// The first accepted decode is sent on `result` and the loop exits, so at
/// most one value is ever produced.
pub async fn sampling_loop(
    source: FrameSource,
    decoder: Arc<dyn BarcodeDecoder>,
    accept: Arc<[Symbology]>,
    period: Duration,
    verbose: bool,
    cancel_token: CancellationToken,
    result: oneshot::Sender<DecodedSymbol>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sampled: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("barcode sampler cancelled after {} frame(s)", sampled);
                return;
            }
            _ = ticker.tick() => {
                let frame = match source.grab() {
                    Ok(frame) => frame,
                    Err(CaptureError::StreamReleased) => {
                        log_info!("barcode sampler stopping: stream released");
                        return;
                    }
                    Err(err) => {
                        if verbose {
                            log_debug!("frame skipped: {err}");
                        }
                        continue;
                    }
                };
                sampled += 1;

                let decoded = tokio::task::spawn_blocking({
                    let decoder = Arc::clone(&decoder);
                    let accept = Arc::clone(&accept);
                    move || decoder.decode(&frame, &accept)
                })
                .await;

                let symbol = match decoded {
                    Ok(Ok(Some(symbol))) => symbol,
                    Ok(Ok(None)) => continue,
                    Ok(Err(err)) => {
                        if verbose {
                            log_debug!("decode noise on frame {}: {err}", sampled);
                        }
                        continue;
                    }
                    Err(join_err) => {
                        log_warn!("decoder worker failed: {join_err}");
                        continue;
                    }
                };

                if !accept.contains(&symbol.symbology) {
                    if verbose {
                        log_debug!("ignoring {} symbol", symbol.symbology.as_str());
                    }
                    continue;
                }
                if symbol.text.trim().is_empty() {
                    if verbose {
                        log_debug!("blank {} decode on frame {}", symbol.symbology.as_str(), sampled);
                    }
                    continue;
                }

                // Cancellation may have landed while the decoder was running.
                if cancel_token.is_cancelled() {
                    return;
                }

                log_info!(
                    "barcode decoded after {} frame(s): {} ({})",
                    sampled,
                    symbol.text,
                    symbol.symbology.as_str()
                );
                let _ = result.send(symbol);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraResourceManager, FacingHint};
    use crate::testing::{FakeCamera, ScriptedDecoder};

    #[tokio::test]
    async fn emits_first_accepted_symbol_once() {
        let camera = FakeCamera::new();
        let manager = CameraResourceManager::new(camera.clone());
        let handle = manager.acquire(FacingHint::Environment).await.expect("acquire");

        let decoder = ScriptedDecoder::after(3, Symbology::Ean13, "8001234567890");
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            decoder.clone(),
            Arc::from(Symbology::RETAIL.to_vec()),
            Duration::from_millis(5),
            true,
            token,
            tx,
        ));

        let symbol = rx.await.expect("symbol");
        assert_eq!(symbol.text, "8001234567890");
        task.await.expect("join");

        // Loop exited right after the decode; no further frames examined.
        assert_eq!(decoder.calls(), 3);
    }

    #[tokio::test]
    async fn ignores_symbologies_outside_accept_list() {
        let camera = FakeCamera::new();
        let manager = CameraResourceManager::new(camera.clone());
        let handle = manager.acquire(FacingHint::Environment).await.expect("acquire");

        let decoder = ScriptedDecoder::after(1, Symbology::QrCode, "https://example.com");
        let (tx, mut rx) = oneshot::channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            decoder.clone(),
            Arc::from(Symbology::RETAIL.to_vec()),
            Duration::from_millis(5),
            false,
            token.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
        assert!(decoder.calls() > 1);

        token.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn blank_decodes_are_treated_as_noise() {
        let camera = FakeCamera::new();
        let manager = CameraResourceManager::new(camera.clone());
        let handle = manager.acquire(FacingHint::Environment).await.expect("acquire");

        let decoder = ScriptedDecoder::after(1, Symbology::Ean13, "  ");
        let (tx, mut rx) = oneshot::channel();
        let token = CancellationToken::new();

        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            decoder.clone(),
            Arc::from(Symbology::RETAIL.to_vec()),
            Duration::from_millis(5),
            true,
            token.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
        assert!(decoder.calls() > 1);

        token.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn zero_period_does_not_stall_the_loop() {
        let camera = FakeCamera::new();
        let manager = CameraResourceManager::new(camera.clone());
        let handle = manager.acquire(FacingHint::Environment).await.expect("acquire");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            ScriptedDecoder::after(2, Symbology::Ean8, "96385074"),
            Arc::from(Symbology::RETAIL.to_vec()),
            Duration::ZERO,
            false,
            CancellationToken::new(),
            tx,
        ));

        assert_eq!(rx.await.expect("symbol").text, "96385074");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn exits_when_stream_is_released() {
        let camera = FakeCamera::new();
        let manager = CameraResourceManager::new(camera.clone());
        let handle = manager.acquire(FacingHint::Environment).await.expect("acquire");

        let decoder = ScriptedDecoder::never();
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(sampling_loop(
            handle.frame_source(),
            decoder,
            Arc::from(Symbology::RETAIL.to_vec()),
            Duration::from_millis(5),
            false,
            CancellationToken::new(),
            tx,
        ));

        handle.release();
        task.await.expect("join");
        assert!(rx.await.is_err());
    }
}
