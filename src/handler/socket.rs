//! Socket handlers: write the event to a TCP or UDP endpoint.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use crate::error::DispatchError;
use crate::event::Event;

fn encode_payload(handler: &str, event: &Event) -> Result<Vec<u8>, DispatchError> {
    serde_json::to_vec(event).map_err(|e| DispatchError::Io {
        handler: handler.to_string(),
        message: format!("event serialization: {}", e),
    })
}

fn io_error(handler: &str, context: &str, e: std::io::Error) -> DispatchError {
    DispatchError::Io {
        handler: handler.to_string(),
        message: format!("{}: {}", context, e),
    }
}

pub(crate) async fn dispatch_tcp(
    handler: &str,
    address: &str,
    event: &Event,
) -> Result<(), DispatchError> {
    let payload = encode_payload(handler, event)?;
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| io_error(handler, "connect", e))?;
    stream
        .write_all(&payload)
        .await
        .map_err(|e| io_error(handler, "write", e))?;
    stream
        .shutdown()
        .await
        .map_err(|e| io_error(handler, "shutdown", e))?;

    tracing::debug!(
        handler = %handler,
        address = %address,
        payload_bytes = payload.len(),
        "TCP handler completed"
    );
    Ok(())
}

pub(crate) async fn dispatch_udp(
    handler: &str,
    address: &str,
    event: &Event,
) -> Result<(), DispatchError> {
    let payload = encode_payload(handler, event)?;
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| io_error(handler, "bind", e))?;
    socket
        .send_to(&payload, address)
        .await
        .map_err(|e| io_error(handler, "send", e))?;

    tracing::debug!(
        handler = %handler,
        address = %address,
        payload_bytes = payload.len(),
        "UDP handler completed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_dispatch_delivers_event_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let event = Event::fixture("server-01", "check_cpu");
        dispatch_tcp("tcp_sink", &address, &event).await.unwrap();

        let received = accept.await.unwrap();
        let decoded: Event = serde_json::from_slice(&received).unwrap();
        assert_eq!(decoded.entity.name, "server-01");
    }

    #[tokio::test]
    async fn tcp_dispatch_fails_on_refused_connection() {
        // Port 1 is privileged and closed in practice.
        let event = Event::fixture("server-01", "check_cpu");
        let result = dispatch_tcp("tcp_sink", "127.0.0.1:1", &event).await;
        assert!(matches!(result, Err(DispatchError::Io { .. })));
    }

    #[tokio::test]
    async fn udp_dispatch_delivers_event_json() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = receiver.local_addr().unwrap().to_string();

        let event = Event::fixture("server-01", "check_cpu");
        dispatch_udp("udp_sink", &address, &event).await.unwrap();

        let mut buf = vec![0u8; 64 * 1024];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        let decoded: Event = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(decoded.check.as_ref().unwrap().name, "check_cpu");
    }
}
