use crate::error::ClientError;
use crate::message::SessionMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected rather than trusted, bounding how
/// much a misbehaving or compromised peer can make us buffer.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Length-prefixed JSON framing over the relay's duplex stream: a 4-byte
/// big-endian length followed by that many bytes of `SessionMessage` JSON.
pub async fn write_message<W>(writer: &mut W, msg: &SessionMessage) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg)?;
    if payload.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(ClientError::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one message, or `Ok(None)` on a clean EOF between frames.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<SessionMessage>, ClientError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ClientError::Io(e)),
    };

    if len > MAX_FRAME_SIZE {
        return Err(ClientError::FrameTooLarge(len as usize));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let msg = serde_json::from_slice(&buf)?;
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message_through_an_in_memory_duplex() {
        let (mut client, mut host) = tokio::io::duplex(4096);

        let msg = SessionMessage::ChannelData {
            channel_id: 7,
            data: b"hello".to_vec(),
        };
        write_message(&mut client, &msg).await.unwrap();

        let received = read_message(&mut host).await.unwrap().unwrap();
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut host) = tokio::io::duplex(4096);
        drop(client);
        let received = read_message(&mut host).await.unwrap();
        assert!(received.is_none());
    }
}
