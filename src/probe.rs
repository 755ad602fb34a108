//! Manual diagnostic probe: one request, printed step by step.
//!
//! Output goes to stdout for the operator; failures are printed as
//! `ERROR: <reason>` and never turn into a non-zero exit.

use std::io::Write;

use std::time::Instant;

use crate::client::{self, NiceClient, Response};
use crate::config::ProbeConfig;
use crate::error::Error;
use crate::payload;
use crate::protocol::{encode_frame, frame_header, HEADER_LEN};

const PREVIEW_CHARS: usize = 300;
const RULE: &str = "==================================================";

/// Send one diagnostic request and print what came back.
pub async fn run(config: ProbeConfig) -> std::io::Result<()> {
    let mut out = std::io::stdout();
    let client = NiceClient::new(config.host.clone(), config.port, config.timeout);
    let data = payload::probe_payload();

    writeln!(out, "{RULE}")?;
    writeln!(out, "NiceProxy Manual Test")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "Target: {}", client.addr())?;
    writeln!(out, "Data: {data}")?;
    match encoded_len(&data) {
        Some(len) => writeln!(out, "Length Header: {len}")?,
        None => writeln!(out, "Length Header: <unencodable>")?,
    }
    writeln!(out, "{RULE}")?;
    writeln!(out)?;
    writeln!(out, "Sending request...")?;
    out.flush()?;

    let result = send(&client, &data, &mut out).await;
    report(&mut out, result)
}

/// One exchange, announcing on `out` once the request is on the wire.
async fn send<W: Write>(client: &NiceClient, data: &str, out: &mut W) -> Result<Response, Error> {
    let request = encode_frame(data)?;

    let start = Instant::now();
    let mut stream = client.connect().await?;
    client::write_request(&mut stream, &request, client.timeout()).await?;
    writeln!(out, "Request sent, waiting for response...")?;
    out.flush()?;

    let frame = client::read_response(&mut stream, client.timeout()).await?;
    Response::from_frame(&frame, start.elapsed())
}

fn encoded_len(data: &str) -> Option<String> {
    let (bytes, _, unmappable) = encoding_rs::EUC_KR.encode(data);
    if unmappable {
        return None;
    }
    frame_header(bytes.len() as u64)
        .ok()
        .map(|header| String::from_utf8_lossy(&header).into_owned())
}

fn report<W: Write>(out: &mut W, result: Result<Response, Error>) -> std::io::Result<()> {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            writeln!(out, "ERROR: {}", describe(&e))?;
            return Ok(());
        }
    };

    let header: String = response.text.chars().take(HEADER_LEN).collect();
    writeln!(
        out,
        "Response length header: {header} (data: {} bytes)",
        response.wire_len.saturating_sub(HEADER_LEN)
    )?;
    writeln!(out)?;
    writeln!(out, "Response received! Total: {} bytes", response.wire_len)?;
    writeln!(out, "Elapsed: {:.1} ms", response.elapsed_ms())?;
    writeln!(out)?;
    writeln!(out, "First {PREVIEW_CHARS} chars:")?;
    let preview: String = response.text.chars().take(PREVIEW_CHARS).collect();
    writeln!(out, "{preview}")?;
    writeln!(out, "...")?;
    Ok(())
}

fn describe(error: &Error) -> String {
    match error {
        Error::Timeout { .. } => "Timeout waiting for response".to_string(),
        other => other.to_string(),
    }
}
