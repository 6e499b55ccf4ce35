use crate::error::{Result, TransferError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::{HEADER_DELIMITER, MAX_HEADER_LEN, READ_IDLE_TIMEOUT};

/// Metadata sent ahead of the raw byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub file_name: String,
    /// Exact number of payload bytes that follow the header
    pub total_size: u64,
}

impl TransferHeader {
    pub fn new(file_name: impl Into<String>, total_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
        }
    }

    /// Encode as UTF-8 `name|size`
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.file_name.is_empty() {
            return Err(TransferError::protocol("file name is empty"));
        }
        if self.file_name.contains(HEADER_DELIMITER) {
            return Err(TransferError::protocol(format!(
                "file name {:?} contains the reserved '{}' character",
                self.file_name, HEADER_DELIMITER
            )));
        }

        let text = format!("{}{}{}", self.file_name, HEADER_DELIMITER, self.total_size);
        if text.len() > MAX_HEADER_LEN {
            return Err(TransferError::protocol(format!(
                "header too large ({} bytes, max {})",
                text.len(),
                MAX_HEADER_LEN
            )));
        }
        Ok(text.into_bytes())
    }

    /// Decode a `name|size` body. The size is split off at the last delimiter.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| TransferError::protocol(format!("header is not UTF-8: {}", e)))?;

        let (name, size) = text.rsplit_once(HEADER_DELIMITER).ok_or_else(|| {
            TransferError::protocol(format!("header {:?} is missing the delimiter", text))
        })?;

        if name.is_empty() {
            return Err(TransferError::protocol("header carries an empty file name"));
        }

        let size = size.trim();
        if size.starts_with('-') {
            return Err(TransferError::protocol(format!("negative size {:?}", size)));
        }
        let total_size = size
            .parse::<u64>()
            .map_err(|_| TransferError::protocol(format!("invalid size {:?}", size)))?;

        Ok(Self::new(name, total_size))
    }
}

/// Write the header as a 4-byte big-endian length prefix plus body
pub async fn write_header<W>(stream: &mut W, header: &TransferHeader) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = header.encode()?;
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).await.map_err(TransferError::Network)?;
    stream.write_all(&body).await.map_err(TransferError::Network)?;
    Ok(())
}

/// Read exactly one length-prefixed header; payload bytes stay in the stream
pub async fn read_header<R>(stream: &mut R) -> Result<TransferHeader>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_timed(stream, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 || len > MAX_HEADER_LEN {
        return Err(TransferError::protocol(format!(
            "header length {} out of range (1..={})",
            len, MAX_HEADER_LEN
        )));
    }

    let mut buf = vec![0u8; len];
    read_exact_timed(stream, &mut buf).await?;
    TransferHeader::decode(&buf)
}

async fn read_exact_timed<R>(stream: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(READ_IDLE_TIMEOUT, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            TransferError::protocol("connection closed before the header was complete"),
        ),
        Ok(Err(e)) => Err(TransferError::Network(e)),
        Err(_) => Err(TransferError::Timeout("waiting for the header")),
    }
}
