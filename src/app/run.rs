use crate::cli::app_config::Cli;
use crate::response::report::Report;
use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use http_body_util::{BodyStream, Full};
use httpstat::{attach, ClientOptions, PhaseTracker, TracedBody, TracingClient};
use hyper::{Request, Response, Uri};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbosity)?;

    do_request(cli).await
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

async fn do_request(cli: Cli) -> Result<(), anyhow::Error> {
    let uri: Uri = cli.url.parse()?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(anyhow!("Can not find scheme in the uri:{}.", uri)),
    }

    let client = TracingClient::new(ClientOptions {
        keep_alive: !cli.no_keepalive,
        insecure: cli.skip_certificate_validate,
        ca_file: cli.certificate_path_option.clone(),
        ..Default::default()
    })?;
    let max_time = Duration::from_secs(cli.max_time);

    for run in 0..cli.count {
        let mut request = build_request(&cli, &uri)?;
        let tracker = Arc::new(PhaseTracker::new());
        attach(&mut request, tracker.clone());

        let (status, version, body_bytes) = timeout(max_time, exchange(&client, request, &cli))
            .await
            .map_err(|_| anyhow!("Request timeout in {} seconds", cli.max_time))??;
        tracker.finalize(Instant::now());

        let report = Report {
            url: cli.url.clone(),
            status,
            version,
            body_bytes,
            tls: tracker.is_tls(),
            reused: tracker.is_reused(),
            durations: tracker.snapshot(),
        };
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            if run > 0 {
                println!();
            }
            print!("{}", report);
        }
    }
    Ok(())
}

fn build_request(cli: &Cli, uri: &Uri) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let mut method = String::from("GET");
    let mut content_type_option = None;

    if cli.body_option.is_some() {
        method = String::from("POST");
        content_type_option = Some("application/x-www-form-urlencoded");
    }
    if let Some(method_userdefined) = cli.method_option.as_ref() {
        method = method_userdefined.to_uppercase();
    }

    let mut request = Request::builder()
        .method(method.as_str())
        .uri(uri.clone())
        .body(Full::new(
            cli.body_option.clone().map(Bytes::from).unwrap_or_default(),
        ))?;

    let headers = request.headers_mut();
    if let Some(content_type) = content_type_option {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    let user_agent = cli
        .user_agent_option
        .as_deref()
        .unwrap_or(concat!("httpstat/", env!("CARGO_PKG_VERSION")));
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

    for x in &cli.headers {
        let split: Vec<&str> = x.splitn(2, ':').collect();
        if split.len() == 2 {
            headers.insert(
                HeaderName::from_str(split[0].trim())?,
                HeaderValue::from_str(split[1].trim_start())?,
            );
        } else {
            return Err(anyhow!("header error: '{}'", x));
        }
    }
    Ok(request)
}

/// Sends the request and reads the whole body, returning status, version and
/// body size.
async fn exchange(
    client: &TracingClient,
    request: Request<Full<Bytes>>,
    cli: &Cli,
) -> Result<(u16, String, u64), anyhow::Error> {
    let res: Response<TracedBody> = client.request(request).await?;
    let status = res.status().as_u16();
    let version = format!("{:?}", res.version());

    let mut file = match cli.file_path_option.as_ref() {
        Some(file_path) => Some(open_output(file_path)?),
        None => None,
    };

    let mut body_stream = BodyStream::new(res.into_body());
    let mut received = 0u64;
    while let Some(frame) = body_stream.next().await {
        let frame = frame.context("Error while reading response body")?;
        let Ok(bytes) = frame.into_data() else {
            continue;
        };
        received += bytes.len() as u64;
        if let Some(file) = file.as_mut() {
            file.write_all(&bytes)
                .context("Error writing chunk to file")?;
        }
    }
    debug!("Read {} body bytes", received);
    Ok((status, version, received))
}

fn open_output(file_path: &str) -> Result<File, anyhow::Error> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(file_path)
        .context(format!("Failed to open or create file: {}", file_path))
}
