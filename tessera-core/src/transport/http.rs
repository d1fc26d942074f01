use super::{ObjHdr, ObjReader, RecvHandler, RecvHandlers, Transport};
use crate::cluster::NodeInfo;
use crate::{Result, TesseraError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Request header carrying the hex-encoded JSON [`ObjHdr`].
pub const OBJ_HDR_HEADER: &str = "x-tessera-hdr";

pub const TRANSPORT_PATH: &str = "/v1/transport";

pub fn encode_hdr(hdr: &ObjHdr) -> Result<String> {
    Ok(hex::encode(serde_json::to_vec(hdr)?))
}

pub fn decode_hdr(value: &str) -> Result<ObjHdr> {
    let raw = hex::decode(value)
        .map_err(|e| TesseraError::Transport(format!("malformed object header: {}", e)))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Streams objects to peers as `PUT /v1/transport/<trname>` requests.
///
/// Inbound requests are routed by the node's HTTP server into [`Self::handlers`].
pub struct HttpTransport {
    client: reqwest::Client,
    handlers: Arc<RecvHandlers>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            handlers: Arc::new(RecvHandlers::new()),
        })
    }

    pub fn handlers(&self) -> &Arc<RecvHandlers> {
        &self.handlers
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn reg_recv(&self, trname: &str, handler: Arc<dyn RecvHandler>) -> Result<()> {
        self.handlers.register(trname, handler)
    }

    fn unreg_recv(&self, trname: &str) -> bool {
        self.handlers.unregister(trname)
    }

    async fn send(&self, peer: &NodeInfo, trname: &str, hdr: ObjHdr, body: ObjReader) -> Result<()> {
        let url = format!("http://{}{}/{}", peer.address, TRANSPORT_PATH, trname);
        let encoded = encode_hdr(&hdr)?;

        let response = self
            .client
            .put(&url)
            .header(OBJ_HDR_HEADER, encoded)
            .header(reqwest::header::CONTENT_LENGTH, hdr.size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        tracing::warn!(
            "transport {} to {} failed for {}: {} {}",
            trname,
            peer.node_id,
            hdr.obj_name,
            status,
            text
        );
        match status {
            StatusCode::INSUFFICIENT_STORAGE => Err(TesseraError::OutOfSpace(format!(
                "{}: {}",
                peer.node_id, text
            ))),
            StatusCode::NOT_FOUND => Err(TesseraError::NoRecvHandler(format!(
                "{} on {}",
                trname, peer.node_id
            ))),
            _ => Err(TesseraError::Transport(format!(
                "{} returned {}: {}",
                peer.node_id, status, text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bucket;
    use crate::transport::Opcode;

    #[test]
    fn test_hdr_encoding() {
        let hdr = ObjHdr {
            bucket: Bucket::ais("b").unwrap().with_namespace("ns").unwrap(),
            obj_name: "dir/obj name".to_string(),
            size: 42,
            checksum: Some("abc".to_string()),
            sender: "t1".to_string(),
            opcode: Opcode::Object,
        };
        let encoded = encode_hdr(&hdr).unwrap();
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(decode_hdr(&encoded).unwrap(), hdr);

        let done = ObjHdr::done(Bucket::ais("b").unwrap());
        assert!(decode_hdr(&encode_hdr(&done).unwrap()).unwrap().is_done());

        // headers without an opcode carry an object
        let legacy = r#"{"bucket":{"name":"b","provider":"ais"},"obj_name":"o","size":1,"sender":"t1"}"#;
        assert_eq!(decode_hdr(&hex::encode(legacy)).unwrap().opcode, Opcode::Object);

        assert!(decode_hdr("zz").is_err());
        assert!(decode_hdr(&hex::encode(b"{}")).is_err());
    }
}
