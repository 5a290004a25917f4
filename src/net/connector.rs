//! Outbound TCP connection establishment.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::TransportError;

/// Opens TCP streams with the connect-phase timeout applied.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connect to `address` (`host:port`).
    pub async fn connect(&self, address: &str) -> Result<TcpStream, TransportError> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    address: address.to_string(),
                    timeout: self.connect_timeout,
                })
            }
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        tracing::trace!(host = %address, "TCP connection established");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_secs(1));
        let err = connector.connect(&address).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn connects_to_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let connector = TcpConnector::new(Duration::from_secs(1));
        let stream = connector.connect(&address).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
