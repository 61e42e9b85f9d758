//! Subscription command loop.
//!
//! One loop drives one [`Consumer`] for the lifetime of a subscribe request.
//! Every command gets exactly one frame back, except a disconnect which gets
//! none:
//!
//! | command   | consumer calls      | reply                          |
//! |-----------|---------------------|--------------------------------|
//! | `INIT`    | `next`              | message                        |
//! | `ACK`     | `ack`, then `next`  | message, or error frame + end  |
//! | `NACK`    | `nack`, then `next` | message, or error frame + end  |
//! | other     | none                | error frame, loop continues    |
//!
//! A disconnect is always an implicit NACK, never an implicit commit.
//! Cancellation while waiting in `next` ends the loop without a frame.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Consumer;
use crate::transport::error::{CodecError, ServerError};
use crate::transport::message::{Command, Frame};
use crate::utils::BrokerError;

/// Run the command loop until the client leaves, a fatal error is reported,
/// or `cancel` fires.
///
/// The consumer is dropped on return, which releases any message it still
/// holds and removes it from the broker's registry.
pub async fn serve_consumer<C, F>(
    consumer: Consumer,
    mut commands: C,
    mut frames: F,
    cancel: CancellationToken,
) where
    C: Stream<Item = Result<Command, CodecError>> + Unpin,
    F: Sink<Frame> + Unpin,
    F::Error: std::fmt::Display,
{
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = commands.next() => read,
        };

        let command = match read {
            None => {
                warn!("client disconnected");
                nack_on_disconnect(&consumer);
                break;
            }
            Some(Err(e)) if e.is_disconnect() => {
                warn!(error = %e, "client disconnected");
                nack_on_disconnect(&consumer);
                break;
            }
            Some(Err(e)) => {
                error!(error = %e, "failed decoding command");
                send(&mut frames, Frame::error(ServerError::DecodingCommand)).await;
                break;
            }
            Some(Ok(command)) => command,
        };

        let settled = match &command {
            Command::Init => {
                debug!(cmd = %command, "initialising consumer");
                Ok(())
            }
            Command::Ack => {
                debug!(cmd = %command, "ACKing message");
                consumer.ack().map_err(|e| (e, ServerError::Ack))
            }
            Command::Nack => {
                debug!(cmd = %command, "NACKing message");
                consumer.nack().map_err(|e| (e, ServerError::Nack))
            }
            Command::Unknown(raw) => {
                warn!(cmd = %raw, "unrecognised command received");
                if !send(&mut frames, Frame::error(ServerError::UnrecognisedCommand)).await {
                    nack_on_disconnect(&consumer);
                    break;
                }
                continue;
            }
        };

        if let Err((e, reply)) = settled {
            error!(cmd = %command, error = %e, "failed to settle message");
            send(&mut frames, Frame::error(reply)).await;
            break;
        }

        match consumer.next(&cancel).await {
            Ok(payload) => {
                let len = payload.len();
                if !send(&mut frames, Frame::Message(payload)).await {
                    nack_on_disconnect(&consumer);
                    break;
                }
                debug!(cmd = %command, bytes = len, "written message to client");
            }
            Err(BrokerError::Cancelled) => {
                info!("client disconnected while waiting for message");
                break;
            }
            Err(e) => {
                error!(error = %e, "failed to get next value for topic");
                send(&mut frames, Frame::error(ServerError::NextValue)).await;
                break;
            }
        }
    }

    debug!(consumer = %consumer.id(), "subscription finished");
}

/// Write one frame. False when the client can no longer be reached.
async fn send<F>(frames: &mut F, frame: Frame) -> bool
where
    F: Sink<Frame> + Unpin,
    F::Error: std::fmt::Display,
{
    match frames.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed writing frame to client");
            false
        }
    }
}

fn nack_on_disconnect(consumer: &Consumer) {
    match consumer.nack() {
        Ok(()) => info!("returned in-flight message to the queue"),
        Err(BrokerError::NothingClaimed) => {}
        Err(e) => error!(error = %e, "failed to nack"),
    }
}
