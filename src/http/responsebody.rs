//! Capped response body reading.

use crate::base::context::classify_hyper_error;
use crate::base::neterror::NetError;
use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Body;

/// Reads at most `max_body` bytes from `body`.
///
/// Reading stops as soon as the cap is reached; the rest of the body is
/// left unread. A transport error before the cap is hit is returned as a
/// classified failure.
pub async fn read_body_limited<B>(body: B, max_body: usize) -> Result<Bytes, NetError>
where
    B: Body + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut buf = BytesMut::new();
    read_body_into(body, &mut buf, max_body).await?;
    Ok(buf.freeze())
}

/// Like [`read_body_limited`], but appends to a caller-owned buffer, so the
/// bytes received before a failure (or before the future is dropped on a
/// deadline) stay available.
pub async fn read_body_into<B>(
    mut body: B,
    buf: &mut BytesMut,
    max_body: usize,
) -> Result<(), NetError>
where
    B: Body + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    while buf.len() < max_body {
        match body.frame().await {
            None => break,
            Some(Ok(frame)) => {
                if let Ok(mut data) = frame.into_data() {
                    let room = max_body - buf.len();
                    let take = data.remaining().min(room);
                    buf.extend_from_slice(&data.copy_to_bytes(take));
                }
            }
            Some(Err(e)) => return Err(classify_body_error(e.into())),
        }
    }
    Ok(())
}

fn classify_body_error(err: Box<dyn std::error::Error + Send + Sync>) -> NetError {
    match err.downcast::<hyper::Error>() {
        Ok(hyper_err) => classify_hyper_error(&hyper_err),
        Err(other) => NetError::unknown(other),
    }
}
