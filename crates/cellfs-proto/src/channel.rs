//! Length-delimited postcard framing over a byte stream.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::constants::MAX_FRAME_LENGTH;
use crate::error::{ProtoError, ProtoResult};

/// A framed message stream. Each frame is a 4-byte big-endian length
/// followed by one postcard-encoded message.
#[derive(Debug)]
pub struct Channel<S> {
    framed: Framed<S, LengthDelimitedCodec>,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        Self {
            framed: Framed::new(io, codec),
        }
    }

    /// Encode and send one message, flushing the stream.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> ProtoResult<()> {
        let body = postcard::to_stdvec(msg).map_err(ProtoError::Encode)?;
        self.framed.send(Bytes::from(body)).await?;
        Ok(())
    }

    /// Next message, or `None` once the peer has closed its send side.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> ProtoResult<Option<T>> {
        match self.framed.next().await {
            None => Ok(None),
            Some(frame) => {
                let frame = frame?;
                postcard::from_bytes(&frame)
                    .map(Some)
                    .map_err(ProtoError::Decode)
            }
        }
    }

    /// Like [`recv`](Self::recv) but end of stream is an error.
    pub async fn recv_some<T: DeserializeOwned>(&mut self) -> ProtoResult<T> {
        self.recv().await?.ok_or(ProtoError::Closed)
    }

    /// Send `request` and wait for the reply, bounded by `timeout`.
    pub async fn call<Req, Resp>(&mut self, request: &Req, timeout: Duration) -> ProtoResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        tokio::time::timeout(timeout, async {
            self.send(request).await?;
            self.recv_some().await
        })
        .await
        .map_err(|_| ProtoError::Timeout(timeout))?
    }

    /// Flush and shut down the send side. The peer sees end of stream.
    pub async fn close(&mut self) -> ProtoResult<()> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Hello, SessionRequest, SessionResponse};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_messages_cross_a_duplex() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Channel::new(a);
        let mut server = Channel::new(b);

        client.send(&Hello::Session).await.unwrap();
        client.send(&SessionRequest::Read { len: 1024 }).await.unwrap();

        assert_eq!(server.recv_some::<Hello>().await.unwrap(), Hello::Session);
        assert_eq!(
            server.recv_some::<SessionRequest>().await.unwrap(),
            SessionRequest::Read { len: 1024 }
        );

        server
            .send(&SessionResponse::Read { content: vec![7; 3] })
            .await
            .unwrap();
        let resp: SessionResponse = client.recv_some().await.unwrap();
        assert_eq!(resp, SessionResponse::Read { content: vec![7; 3] });
    }

    #[tokio::test]
    async fn test_close_is_end_of_stream() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client = Channel::new(a);
        let mut server = Channel::new(b);

        client.close().await.unwrap();
        assert!(server.recv::<SessionRequest>().await.unwrap().is_none());
        assert!(matches!(
            server.recv_some::<SessionRequest>().await,
            Err(ProtoError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_decode_error() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut server = Channel::new(b);

        // Length 2, then a variant index far past the end of the enum.
        a.write_all(&[0, 0, 0, 2, 0x7f, 0x7f]).await.unwrap();
        assert!(matches!(
            server.recv::<SessionRequest>().await,
            Err(ProtoError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (a, _b) = tokio::io::duplex(4096);
        let mut client = Channel::new(a);
        let result: ProtoResult<SessionResponse> = client
            .call(&SessionRequest::Stat, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ProtoError::Timeout(_))));
    }
}
