//! Route programming commands and call wrappers.
//!
//! Modify is the correlated one: every queued operation carries an id, the
//! drain hook records it on the way out, and inbound results are matched
//! back by id, so `rib modify show` can pair each request with its outcome
//! even when results arrive out of order.

use super::{Shell, managed_call_delegate};
use anyhow::bail;
use grpcsh_core::{Call, CallShape, SharedCorrelation, Stored, correlate, handlers};
use grpcsh_proto::rib::{
    self, AddressFamily, ModifyResponse, ModifyResult, NextHop, NextHopGroup, Request, RouteEntry,
    RouteKey, RouteOp, VersionRequest, VersionResponse,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const HELP: &str = "\
rib commands:
  rib version create <name>
  rib version show <name>
  rib modify create <name>
  rib modify route <name> <add|replace|delete> <ipv4|ipv6> <prefix>
                   [--id N] [--preference N] [--rtm-preference N]
                   [--metric N] [--next-hop IP]
  rib modify end-of-rib <name> <table-id> [--id N]
  rib modify next-hop-group <name> <request-id> <group-id> [--weight N]
                   [--primary-ip IP] [--primary-labels l1,l2,...]
                   [--backup-ip IP] [--backup-labels l1,l2,...]
  rib modify show <name> [id]
  rib modify save <name> <file>";

pub fn command(shell: &mut Shell, args: &[&str]) -> anyhow::Result<()> {
    match args {
        ["help"] | [] => println!("{HELP}"),

        ["version", "create", name] => {
            let wrapper = Version::create(shell, name);
            shell.registry.register(Arc::new(wrapper));
        }
        ["version", "show", name] => {
            let wrapper: Version = shell.registry.get_as("version", name)?;
            match &*wrapper.last.lock() {
                Some(response) => {
                    println!("api version: {}", response.api_version);
                    for table in &response.operational_tables {
                        println!("  table {}: version {}", table.id, table.version);
                    }
                }
                None => println!("no response received yet"),
            }
        }

        ["modify", "create", name] => {
            let wrapper = Modify::create(shell, name);
            shell.registry.register(Arc::new(wrapper));
        }
        ["modify", "route", name, op, family, prefix, options @ ..] => {
            let op: RouteOp = op.parse()?;
            let family: AddressFamily = family.parse()?;
            let entry = RouteEntry {
                key: Some(RouteKey {
                    family: family as i32,
                    prefix: (*prefix).to_string(),
                    preference: opt_u64(options, "--preference")?.unwrap_or(0) as u32,
                }),
                rtm_preference: opt_u64(options, "--rtm-preference")?.unwrap_or(0) as u32,
                metric: opt_u64(options, "--metric")?.unwrap_or(0) as u32,
                tunnel_next_hop: opt_value(options, "--next-hop").unwrap_or("").to_string(),
                groups: Vec::new(),
            };
            let wrapper: Modify = shell.registry.get_as("modify", name)?;
            let id = wrapper.queue(opt_u64(options, "--id")?, |id| Request::route(id, op, entry));
            println!("queued request {id}");
        }
        ["modify", "end-of-rib", name, table_id, options @ ..] => {
            let table_id: u32 = table_id
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid table id <{table_id}>"))?;
            let wrapper: Modify = shell.registry.get_as("modify", name)?;
            let id = wrapper.queue(opt_u64(options, "--id")?, |id| {
                Request::end_of_rib(id, table_id)
            });
            println!("queued request {id}");
        }
        ["modify", "next-hop-group", name, request_id, group_id, options @ ..] => {
            let request_id: u64 = request_id
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid request id <{request_id}>"))?;
            let group_id: u32 = group_id
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid group id <{group_id}>"))?;
            let group = NextHopGroup {
                id: group_id,
                weight: opt_u64(options, "--weight")?.unwrap_or(0) as u32,
                primary: next_hop(options, "--primary-ip", "--primary-labels")?,
                backup: next_hop(options, "--backup-ip", "--backup-labels")?,
            };
            let wrapper: Modify = shell.registry.get_as("modify", name)?;
            wrapper.attach_group(request_id, group)?;
            println!("extended request {request_id}");
        }
        ["modify", "save", name, file] => {
            let wrapper: Modify = shell.registry.get_as("modify", name)?;
            let (json, count) = {
                let map = wrapper.correlation.lock();
                let entries: BTreeMap<_, _> = map.iter().collect();
                (serde_json::to_string_pretty(&entries)?, entries.len())
            };
            std::fs::write(file, json)?;
            println!("saved {count} exchanges to {file}");
        }
        ["modify", "show", name, rest @ ..] => {
            let wrapper: Modify = shell.registry.get_as("modify", name)?;
            let map = wrapper.correlation.lock();
            match rest {
                [] => {
                    if map.is_empty() {
                        println!("no requests tracked");
                    }
                    for (id, exchange) in map.iter() {
                        print_exchange(id, exchange);
                    }
                }
                [id] => {
                    let id: u64 = id.parse().map_err(|_| anyhow::anyhow!("invalid id <{id}>"))?;
                    print_exchange(id, map.lookup(id)?);
                }
                _ => bail!("expected: rib modify show <name> [id]"),
            }
        }

        _ => bail!("unknown rib command, try 'rib help'"),
    }
    Ok(())
}

fn print_exchange(id: u64, exchange: &grpcsh_core::Exchange<Request, ModifyResult>) {
    println!("======= id: {id} =======");
    println!("== request:\n{:#?}", exchange.request);
    match &exchange.response {
        Some(result) => println!("== response:\n{result:#?}"),
        None => println!("== response: not yet received"),
    }
}

fn opt_value<'a>(options: &[&'a str], flag: &str) -> Option<&'a str> {
    options
        .iter()
        .position(|o| *o == flag)
        .and_then(|at| options.get(at + 1).copied())
}

fn opt_u64(options: &[&str], flag: &str) -> anyhow::Result<Option<u64>> {
    opt_value(options, flag)
        .map(|raw| {
            raw.parse()
                .map_err(|_| anyhow::anyhow!("invalid value for {flag}: <{raw}>"))
        })
        .transpose()
}

/// Builds one optional next hop from an ip flag and a comma-separated label
/// stack flag. Absent both, there is no hop.
fn next_hop(options: &[&str], ip_flag: &str, labels_flag: &str) -> anyhow::Result<Option<NextHop>> {
    let ip = opt_value(options, ip_flag);
    let labels: Vec<u32> = match opt_value(options, labels_flag) {
        Some(raw) => raw
            .split(',')
            .map(|label| {
                label
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid label <{label}> for {labels_flag}"))
            })
            .collect::<anyhow::Result<_>>()?,
        None => Vec::new(),
    };
    if ip.is_none() && labels.is_empty() {
        return Ok(None);
    }
    Ok(Some(NextHop {
        ip_address: ip.unwrap_or("").to_string(),
        pushed_label_stack: labels,
    }))
}

#[derive(Clone)]
pub struct Version {
    call: Call<VersionRequest, VersionResponse>,
    last: Stored<VersionResponse>,
}

impl Version {
    fn create(shell: &Shell, name: &str) -> Self {
        let transport = rib::version(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "version",
            name,
            CallShape::Unary,
            transport,
            shell.config.metadata(),
        );
        let (handler, last) = handlers::store_last();
        call.set_response_handler(handler);
        let slot = Arc::clone(&last);
        call.set_clear_hook(Box::new(move || {
            *slot.lock() = None;
        }));
        Self { call, last }
    }
}

managed_call_delegate!(Version, execute(|this: &Version, timeout| {
    this.call.set_request(VersionRequest {});
    this.call.execute(timeout)
}));

#[derive(Clone)]
pub struct Modify {
    call: Call<Request, ModifyResponse>,
    correlation: SharedCorrelation<Request, ModifyResult>,
}

impl Modify {
    fn create(shell: &Shell, name: &str) -> Self {
        let transport = rib::modify(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "modify",
            name,
            CallShape::Streaming,
            transport,
            shell.config.metadata(),
        );
        let correlation = correlate::shared();

        let recorder: SharedCorrelation<Request, ModifyResult> = Arc::clone(&correlation);
        call.set_drain_hook(Box::new(move |id, request: &Request| {
            recorder.lock().record(id, request.clone());
        }));
        call.set_response_handler(handlers::correlate(Arc::clone(&correlation), rib::results));
        let reset = Arc::clone(&correlation);
        call.set_clear_hook(Box::new(move || {
            reset.lock().clear();
        }));

        Self { call, correlation }
    }

    /// Queues one id-tagged operation, assigning the next unused id when the
    /// operator did not supply one, and returns the id used.
    fn queue(&self, id: Option<u64>, build: impl FnOnce(u64) -> Request) -> u64 {
        let id = match id {
            Some(id) => id,
            None => self.correlation.lock().next_id(),
        };
        self.call.push_tagged(Some(id), build(id))
    }

    /// Extends a still-queued add or replace request with a next-hop group.
    /// Requests already sent to the transport are out of reach.
    fn attach_group(&self, request_id: u64, group: NextHopGroup) -> grpcsh_core::Result<()> {
        self.call
            .update_tagged(request_id, |request| request.attach_group(group))
    }
}

managed_call_delegate!(Modify);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_flags_parse_by_name() {
        let options = ["--id", "7", "--metric", "20"];
        assert_eq!(opt_u64(&options, "--id").unwrap(), Some(7));
        assert_eq!(opt_u64(&options, "--metric").unwrap(), Some(20));
        assert_eq!(opt_u64(&options, "--preference").unwrap(), None);
        assert!(opt_u64(&["--id", "many"], "--id").is_err());
    }

    #[test]
    fn next_hops_build_from_ip_and_label_flags() {
        let options = ["--primary-ip", "192.0.2.1", "--primary-labels", "100,200"];
        let hop = next_hop(&options, "--primary-ip", "--primary-labels")
            .unwrap()
            .unwrap();
        assert_eq!(hop.ip_address, "192.0.2.1");
        assert_eq!(hop.pushed_label_stack, vec![100, 200]);

        assert!(
            next_hop(&options, "--backup-ip", "--backup-labels")
                .unwrap()
                .is_none()
        );
        assert!(next_hop(&["--primary-labels", "x"], "--primary-ip", "--primary-labels").is_err());
    }

    #[test]
    fn exchanges_serialize_as_id_keyed_json() {
        let mut map: grpcsh_core::CorrelationMap<Request, ModifyResult> =
            grpcsh_core::CorrelationMap::new();
        map.record(1, Request::end_of_rib(1, 254));
        let entries: BTreeMap<_, _> = map.iter().collect();
        let json = serde_json::to_value(&entries).unwrap();

        assert_eq!(json["1"]["request"]["id"], 1);
        assert!(json["1"]["response"].is_null());
    }
}
