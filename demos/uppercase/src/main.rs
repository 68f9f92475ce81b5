// Streams a few lines through an uppercasing test server bound to an
// ephemeral port and prints what comes back.

use bytes::Bytes;
use http_body_util::BodyExt;
use servertest::{full, RequestOptions, TestServer};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> std::result::Result<(), BoxedError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server = TestServer::shared(|req| async move {
        let data = req
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_else(|_| Bytes::new());
        hyper::Response::new(full(String::from_utf8_lossy(&data).to_uppercase()))
    });

    let mut stream = servertest::request(
        &server,
        "/",
        RequestOptions::default().method(hyper::Method::POST),
        None,
    );

    stream.write("hello from the demo\n")?;
    stream.write("served over an ephemeral port\n")?;
    stream.finish();

    let body = stream.collect().await?;
    print!("{}", String::from_utf8_lossy(&body));

    Ok(())
}
