//! Host adapter: runs the dispatcher over a pair of framed byte streams.
//!
//! Requests are handled one at a time, in arrival order, and each gets exactly
//! one `response` frame (without an envelope for unknown operations). Callback
//! deliveries queued while a request runs are written after its response.
//!
//! A frame that is not a valid host message is logged and skipped. A response
//! too large to frame is replaced by an error envelope. Only I/O failures and
//! broken framing end the loop.

use std::io;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::{DEFAULT_MAX_FRAME_BYTES, FrameError, JsonCodec, length_delimited};
use crate::bridge::protocol::{ContextId, Envelope, HostMessage, HostReply};
use crate::callback::{CallbackReceiver, OutboundCallback};
use crate::dispatcher::ProxyDispatcher;
use crate::error::ProxyError;

type ReplyWriter<W> = FramedWrite<W, JsonCodec<HostReply>>;

/// Serves until `reader` reaches EOF, using the default frame limit.
pub async fn serve<R, W>(
    dispatcher: &ProxyDispatcher,
    callbacks: CallbackReceiver,
    reader: R,
    writer: W,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_with_limit(dispatcher, callbacks, reader, writer, DEFAULT_MAX_FRAME_BYTES).await
}

pub async fn serve_with_limit<R, W>(
    dispatcher: &ProxyDispatcher,
    mut callbacks: CallbackReceiver,
    reader: R,
    writer: W,
    max_frame_bytes: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Raw frames, so one bad message does not end the stream.
    let mut reader = FramedRead::new(reader, length_delimited(max_frame_bytes));
    let mut writer = FramedWrite::new(
        writer,
        JsonCodec::<HostReply>::with_max_frame_length(max_frame_bytes),
    );

    tracing::debug!(max_frame_bytes, "Host transport started");

    loop {
        tokio::select! {
            biased;

            Some(callback) = callbacks.recv() => {
                send_callback(&mut writer, callback).await?;
            }

            frame = reader.next() => {
                match frame {
                    Some(Ok(bytes)) => match serde_json::from_slice::<HostMessage>(&bytes) {
                        Ok(HostMessage::Request { context, request }) => {
                            let envelope = dispatcher.handle_value(request, context);
                            send_response(&mut writer, context, envelope).await?;
                        }
                        Ok(HostMessage::Closed { context }) => {
                            if !dispatcher.close_context(context) {
                                tracing::debug!(%context, "Close for unknown context");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                frame_bytes = bytes.len(),
                                "Skipping undecodable host frame"
                            );
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to read host frame");
                        return Err(e);
                    }
                    None => {
                        tracing::debug!("Host closed input");
                        break;
                    }
                }
            }
        }
    }

    while let Ok(callback) = callbacks.try_recv() {
        send_callback(&mut writer, callback).await?;
    }
    Ok(())
}

enum Sent {
    Written,
    /// Not framable; nothing reached the stream.
    Rejected(String),
}

async fn send_reply<W>(writer: &mut ReplyWriter<W>, reply: HostReply) -> io::Result<Sent>
where
    W: AsyncWrite + Unpin,
{
    match writer.send(reply).await {
        Ok(()) => Ok(Sent::Written),
        Err(e) => match FrameError::from_io(&e) {
            Some(frame_error) => Ok(Sent::Rejected(frame_error.to_string())),
            None => Err(e),
        },
    }
}

async fn send_response<W>(
    writer: &mut ReplyWriter<W>,
    context: ContextId,
    envelope: Option<Envelope>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reason = match send_reply(writer, HostReply::Response { context, envelope }).await? {
        Sent::Written => return Ok(()),
        Sent::Rejected(reason) => reason,
    };
    tracing::warn!(%context, %reason, "Response could not be framed, sending an error instead");

    let failure = Envelope::failure(ProxyError::UnsendableResponse(reason).to_string());
    let reply = HostReply::Response {
        context,
        envelope: Some(failure),
    };
    if let Sent::Rejected(reason) = send_reply(writer, reply).await? {
        tracing::error!(%context, %reason, "Error response could not be framed either");
    }
    Ok(())
}

async fn send_callback<W>(writer: &mut ReplyWriter<W>, callback: OutboundCallback) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let context = callback.context;
    let callback_id = callback.message.callback_id;
    if let Sent::Rejected(reason) = send_reply(writer, callback_reply(callback)).await? {
        tracing::warn!(%context, %callback_id, %reason, "Dropping callback that could not be framed");
    }
    Ok(())
}

fn callback_reply(callback: OutboundCallback) -> HostReply {
    HostReply::Callback {
        context: callback.context,
        message: callback.message,
    }
}
