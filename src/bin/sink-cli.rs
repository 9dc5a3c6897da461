use clap::{Parser, Subcommand};
use envoy_types::pb::envoy::config::core::v3::{HeaderMap, HeaderValue};
use envoy_types::pb::envoy::service::ext_proc::v3::external_processor_client::ExternalProcessorClient;
use envoy_types::pb::envoy::service::ext_proc::v3::{
    body_mutation, processing_request, processing_response, CommonResponse, HttpBody, HttpHeaders,
    ProcessingRequest, ProcessingResponse,
};
use serde_json::{json, Value};
use tonic::transport::Channel;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

#[derive(Parser)]
#[command(name = "sink-cli")]
#[command(about = "Client CLI for the extproc sink", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:18080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the liveness service
    Health {
        /// Service name to ask about
        #[arg(long, default_value = "")]
        service: String,
    },
    /// Send a sample transaction and print the returned mutations
    Probe {
        /// Request header as `name:value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// JSON instruction sent in the instruction header
        #[arg(short, long)]
        instructions: Option<String>,

        /// Name of the instruction header
        #[arg(long, default_value = "instructions")]
        instruction_header: String,

        /// Request body, sent as a single final chunk
        #[arg(short, long)]
        body: Option<String>,

        /// Also send a response headers phase
        #[arg(long)]
        response_headers: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health { service } => {
            let mut client = HealthClient::new(connect(cli.url).await?);
            let res = client.check(HealthCheckRequest { service }).await?;
            let status = res.into_inner().status();
            print_json(&json!({ "status": status.as_str_name() }))?;
        }
        Commands::Probe {
            headers,
            instructions,
            instruction_header,
            body,
            response_headers,
        } => {
            let mut pairs = Vec::with_capacity(headers.len() + 1);
            for raw in &headers {
                let (name, value) = raw
                    .split_once(':')
                    .ok_or_else(|| format!("header must be name:value, got {:?}", raw))?;
                pairs.push((name.trim().to_string(), value.trim().to_string()));
            }
            if let Some(instructions) = instructions {
                pairs.push((instruction_header, instructions));
            }

            let mut requests = vec![request_headers(pairs, body.is_none())];
            if let Some(body) = body {
                requests.push(ProcessingRequest {
                    request: Some(processing_request::Request::RequestBody(HttpBody {
                        body: body.into_bytes().into(),
                        end_of_stream: true,
                    })),
                    ..Default::default()
                });
            }
            if response_headers {
                requests.push(ProcessingRequest {
                    request: Some(processing_request::Request::ResponseHeaders(HttpHeaders {
                        headers: Some(HeaderMap::default()),
                        end_of_stream: true,
                        ..Default::default()
                    })),
                    ..Default::default()
                });
            }

            let mut client = ExternalProcessorClient::new(connect(cli.url).await?);
            let mut stream = client
                .process(tokio_stream::iter(requests))
                .await?
                .into_inner();

            let mut responses = Vec::new();
            while let Some(response) = stream.message().await? {
                responses.push(describe(&response));
            }
            print_json(&Value::Array(responses))?;
        }
    }

    Ok(())
}

async fn connect(url: String) -> Result<Channel, Box<dyn std::error::Error>> {
    Ok(Channel::from_shared(url)?.connect().await?)
}

fn request_headers(pairs: Vec<(String, String)>, end_of_stream: bool) -> ProcessingRequest {
    let headers = pairs
        .into_iter()
        .map(|(key, value)| HeaderValue {
            key,
            raw_value: value.into_bytes().into(),
            ..Default::default()
        })
        .collect();

    ProcessingRequest {
        request: Some(processing_request::Request::RequestHeaders(HttpHeaders {
            headers: Some(HeaderMap { headers }),
            end_of_stream,
            ..Default::default()
        })),
        ..Default::default()
    }
}

fn describe(response: &ProcessingResponse) -> Value {
    use processing_response::Response;

    let (phase, common) = match &response.response {
        Some(Response::RequestHeaders(r)) => ("request_headers", r.response.as_ref()),
        Some(Response::ResponseHeaders(r)) => ("response_headers", r.response.as_ref()),
        Some(Response::RequestBody(r)) => ("request_body", r.response.as_ref()),
        Some(Response::ResponseBody(r)) => ("response_body", r.response.as_ref()),
        Some(Response::RequestTrailers(_)) => ("request_trailers", None),
        Some(Response::ResponseTrailers(_)) => ("response_trailers", None),
        Some(_) => ("other", None),
        None => ("unknown", None),
    };

    let mut out = json!({ "phase": phase });
    if let Some(common) = common {
        describe_common(common, &mut out);
    }
    if response.mode_override.is_some() {
        out["mode_override"] = json!(true);
    }
    out
}

fn describe_common(common: &CommonResponse, out: &mut Value) {
    if let Some(mutation) = &common.header_mutation {
        let set: Vec<Value> = mutation
            .set_headers
            .iter()
            .filter_map(|option| option.header.as_ref())
            .map(|h| {
                let value = if h.value.is_empty() {
                    String::from_utf8_lossy(&h.raw_value[..]).into_owned()
                } else {
                    h.value.clone()
                };
                json!({ "name": h.key, "value": value })
            })
            .collect();
        out["set_headers"] = Value::Array(set);
        out["remove_headers"] = json!(mutation.remove_headers);
    }
    if let Some(body_mutation::Mutation::Body(body)) = common
        .body_mutation
        .as_ref()
        .and_then(|m| m.mutation.as_ref())
    {
        out["body"] = json!(String::from_utf8_lossy(&body[..]));
    }
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
