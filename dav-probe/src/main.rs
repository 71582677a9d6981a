mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use http::HeaderValue;
use url::Url;

use dav_client::types::{DISPLAYNAME, GETCONTENTTYPE, GETETAG, GETLASTMODIFIED, RESOURCETYPE};
use dav_client::xml::DAV_URN;
use dav_client::{DavCollection, DavResource, HrefRelation, HyperTransport, Name, Response};

use config::*;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    #[clap(short, long, env = "DAVPROBE_CONFIG", default_value = "davprobe.toml")]
    /// Path to the probe configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the DAV capabilities announced by the server
    Options,
    /// List properties of the resource and, with a depth, of its members
    Propfind {
        /// 0, 1 or infinity
        #[clap(short, long, default_value = "0")]
        depth: String,

        /// `namespace|name`, or a bare name in the DAV: namespace
        props: Vec<String>,
    },
    /// Report changes of a collection since a sync-token
    Sync {
        #[clap(short, long)]
        token: Option<String>,

        #[clap(short, long)]
        limit: Option<u32>,
    },
}

fn parse_depth(src: &str) -> Result<i32> {
    match src {
        "infinity" => Ok(-1),
        v => {
            let depth: i32 = v.parse().context("depth must be 0, 1 or infinity")?;
            if depth < 0 {
                bail!("depth must be 0, 1 or infinity");
            }
            Ok(depth)
        }
    }
}

fn parse_name(src: &str) -> Name {
    match src.split_once('|') {
        Some((ns, local)) => Name::new(ns, local),
        None => Name::new(DAV_URN, src),
    }
}

fn print_response(response: &Response, relation: HrefRelation) {
    let status = match &response.status {
        Some(s) => format!(" ({} {})", s.code.as_u16(), s.reason),
        None => String::new(),
    };
    println!("{:?} {}{}", relation, response.href, status);
    for property in response.properties() {
        println!("    {}: {:?}", property.name(), property);
    }
    for violation in response.errors.iter() {
        println!("    error: {}", violation.name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "davprobe=info,dav_client=info")
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(err=?e, "probe failed");
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = read_config(args.config_file.clone())
        .with_context(|| format!("unable to read {}", args.config_file.display()))?;
    let url = Url::parse(&config.url).context("invalid url in configuration")?;

    let mut transport = HyperTransport::new(&config.client)?;
    if let Some(auth) = config.basic_auth() {
        transport = transport.with_authorization(HeaderValue::from_str(&auth)?);
    }
    let resource = DavResource::new(Arc::new(transport), url).with_config(config.client.clone());

    match args.command {
        Command::Options => {
            let mut resource = resource;
            let (capabilities, parts) = resource.options(true).await?;
            let mut capabilities: Vec<_> = capabilities.into_iter().collect();
            capabilities.sort();
            println!("{} {}", parts.status.as_u16(), resource.location());
            for capability in capabilities {
                println!("    {}", capability);
            }
        }
        Command::Propfind { depth, props } => {
            let mut resource = resource;
            let depth = parse_depth(&depth)?;
            let names: Vec<Name> = match props.is_empty() {
                true => vec![DISPLAYNAME, RESOURCETYPE, GETETAG, GETCONTENTTYPE, GETLASTMODIFIED],
                false => props.iter().map(|p| parse_name(p)).collect(),
            };
            resource
                .propfind(depth, &names, |response, relation| {
                    print_response(&response, relation);
                    Ok(())
                })
                .await?;
        }
        Command::Sync { token, limit } => {
            let mut collection = DavCollection(resource);
            let (mut changed, mut removed) = (0, 0);
            let new_token = collection
                .report_changes(token.as_deref(), false, limit, &[GETETAG], |response, relation| {
                    if relation == HrefRelation::SelfRef {
                        return Ok(());
                    }
                    match response.is_success() {
                        true => {
                            changed += 1;
                            let etag = response.etag().map(|e| e.tag.as_str()).unwrap_or("-");
                            println!("changed {} {}", response.href, etag);
                        }
                        false => {
                            removed += 1;
                            println!("removed {}", response.href);
                        }
                    }
                    Ok(())
                })
                .await?;
            tracing::info!(changed, removed, "sync-collection done");
            match new_token {
                Some(t) => println!("token {}", t),
                None => println!("no token returned"),
            }
        }
    }

    Ok(())
}
