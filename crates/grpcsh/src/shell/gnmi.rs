//! Telemetry/configuration service commands and call wrappers.
//!
//! Each wrapper pairs a typed engine call with the builder state the
//! interactive commands mutate. Unary builders rebuild their single pending
//! request on every mutation, so `execute` always sends the latest draft.

use super::{Shell, managed_call_delegate, parse_secs};
use anyhow::bail;
use grpcsh_core::{Call, CallShape, Collected, Egress, NotificationSink, Record, Stored, handlers};
use grpcsh_proto::gnmi::{
    CapabilityRequest, CapabilityResponse, DataType, Encoding, GetRequest, GetResponse, ListMode,
    SetRequest, SetResponse, SubscribeRequest, SubscribeResponse, Subscription, SubscriptionList,
    Trigger, Update,
};
use grpcsh_proto::{gnmi, path, render};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

const HELP: &str = "\
gnmi commands:
  gnmi capabilities create <name>
  gnmi capabilities show <name>
  gnmi get create <name>
  gnmi get prefix|path <name> <path>
  gnmi get type <name> <all|config|state|operational>
  gnmi get encoding <name> <json|bytes|proto|ascii|json-ietf>
  gnmi get show <name>
  gnmi set create <name>
  gnmi set prefix <name> <path>
  gnmi set update|replace <name> <path> <k=v>... [--types t1,t2]
  gnmi set delete <name> <path>
  gnmi set show <name>
  gnmi subscribe create <name> [stream|once|poll] [encoding]
  gnmi subscribe add <name> <path> [target-defined|on-change|sample] [interval]
  gnmi subscribe poll <name>
  gnmi subscribe show <name>
  gnmi subscribe sink <name> <log:file|udp:addr:port|tcp:addr:port>";

pub async fn command(shell: &mut Shell, args: &[&str]) -> anyhow::Result<()> {
    match args {
        ["help"] | [] => println!("{HELP}"),

        ["capabilities", "create", name] => {
            let wrapper = Capabilities::create(shell, name);
            shell.registry.register(Arc::new(wrapper));
        }
        ["capabilities", "show", name] => {
            let wrapper: Capabilities = shell.registry.get_as("capabilities", name)?;
            match &*wrapper.last.lock() {
                Some(response) => println!("{response:#?}"),
                None => println!("no response received yet"),
            }
        }

        ["get", "create", name] => {
            let wrapper = Get::create(shell, name);
            shell.registry.register(Arc::new(wrapper));
        }
        ["get", "prefix", name, prefix] => {
            shell.registry.get_as::<Get>("get", name)?.update_draft(|draft| {
                draft.prefix = Some(path::parse_path(prefix, shell.config.delimiter));
            });
        }
        ["get", "path", name, request_path] => {
            let parsed = path::parse_path(request_path, shell.config.delimiter);
            shell
                .registry
                .get_as::<Get>("get", name)?
                .update_draft(|draft| draft.path.push(parsed.clone()));
        }
        ["get", "type", name, data_type] => {
            let data_type: DataType = data_type.parse()?;
            shell
                .registry
                .get_as::<Get>("get", name)?
                .update_draft(|draft| draft.data_type = data_type as i32);
        }
        ["get", "encoding", name, encoding] => {
            let encoding: Encoding = encoding.parse()?;
            shell
                .registry
                .get_as::<Get>("get", name)?
                .update_draft(|draft| draft.encoding = encoding as i32);
        }
        ["get", "show", name] => {
            let wrapper: Get = shell.registry.get_as("get", name)?;
            match &*wrapper.last.lock() {
                Some(response) => println!("{response:#?}"),
                None => println!("no response received yet"),
            }
        }

        ["set", "create", name] => {
            let wrapper = Set::create(shell, name);
            shell.registry.register(Arc::new(wrapper));
        }
        ["set", "prefix", name, prefix] => {
            shell.registry.get_as::<Set>("set", name)?.update_draft(|draft| {
                draft.prefix = Some(path::parse_path(prefix, shell.config.delimiter));
            });
        }
        ["set", op @ ("update" | "replace"), name, update_path, values @ ..] => {
            let update = build_update(update_path, values, shell.config.delimiter)?;
            let replace = *op == "replace";
            shell.registry.get_as::<Set>("set", name)?.update_draft(|draft| {
                if replace {
                    draft.replace.push(update.clone());
                } else {
                    draft.update.push(update.clone());
                }
            });
        }
        ["set", "delete", name, delete_path] => {
            let parsed = path::parse_path(delete_path, shell.config.delimiter);
            shell
                .registry
                .get_as::<Set>("set", name)?
                .update_draft(|draft| draft.delete.push(parsed.clone()));
        }
        ["set", "show", name] => {
            let wrapper: Set = shell.registry.get_as("set", name)?;
            match &*wrapper.last.lock() {
                Some(response) => println!("{response:#?}"),
                None => println!("no response received yet"),
            }
        }

        ["subscribe", "create", name, rest @ ..] => {
            let mode = match rest.first() {
                Some(mode) => mode.parse()?,
                None => ListMode::Stream,
            };
            let encoding = match rest.get(1) {
                Some(encoding) => encoding.parse()?,
                None => Encoding::Json,
            };
            let wrapper = Subscribe::create(shell, name, mode, encoding);
            shell.registry.register(Arc::new(wrapper));
        }
        ["subscribe", "add", name, sub_path, rest @ ..] => {
            let trigger = match rest.first() {
                Some(trigger) => trigger.parse()?,
                None => Trigger::TargetDefined,
            };
            let interval = match rest.get(1) {
                Some(interval) => parse_secs(interval)?.as_nanos() as u64,
                None => 0,
            };
            let wrapper: Subscribe = shell.registry.get_as("subscribe", name)?;
            wrapper.add(Subscription {
                path: Some(path::parse_path(sub_path, shell.config.delimiter)),
                mode: trigger as i32,
                sample_interval: interval,
                suppress_redundant: false,
                heartbeat_interval: 0,
            });
        }
        ["subscribe", "poll", name] => {
            shell
                .registry
                .get_as::<Subscribe>("subscribe", name)?
                .call
                .push(SubscribeRequest::poll());
        }
        ["subscribe", "show", name] => {
            let wrapper: Subscribe = shell.registry.get_as("subscribe", name)?;
            let records = wrapper.records.lock();
            if records.is_empty() {
                println!("no notifications received yet");
            }
            for record in records.iter() {
                match serde_json::to_string(record) {
                    Ok(line) => println!("{line}"),
                    Err(e) => println!("unrenderable record: {e}"),
                }
            }
        }
        ["subscribe", "sink", name, target] => {
            let wrapper: Subscribe = shell.registry.get_as("subscribe", name)?;
            wrapper.set_sink(open_egress(target).await?);
        }

        _ => bail!("unknown gnmi command, try 'gnmi help'"),
    }
    Ok(())
}

/// Builds one update from `k=v` value arguments and an optional trailing
/// `--types t1,t2` list naming the YANG type of each value in order.
fn build_update(update_path: &str, args: &[&str], delimiter: char) -> anyhow::Result<Update> {
    let (value_args, types) = match args.iter().position(|a| *a == "--types") {
        Some(at) => {
            let list = args
                .get(at + 1)
                .ok_or_else(|| anyhow::anyhow!("--types needs a comma-separated list"))?;
            (&args[..at], list.split(',').map(String::from).collect())
        }
        None => (args, Vec::new()),
    };
    if value_args.is_empty() {
        bail!("expected at least one k=v value");
    }
    let values: Vec<(String, String)> = value_args
        .iter()
        .map(|arg| match arg.split_once('=') {
            Some((k, v)) => Ok((k.to_string(), v.to_string())),
            None => Err(anyhow::anyhow!("expected k=v, got <{arg}>")),
        })
        .collect::<anyhow::Result<_>>()?;
    let object = path::coerce_values(&values, &types)?;
    Ok(Update::json(
        path::parse_path(update_path, delimiter),
        &Value::Object(object),
    )?)
}

async fn open_egress(target: &str) -> anyhow::Result<Egress> {
    let Some((protocol, rest)) = target.split_once(':') else {
        bail!("expected log:<file>, udp:<addr>:<port> or tcp:<addr>:<port>");
    };
    Ok(match protocol {
        "log" => Egress::log(rest).await?,
        "udp" => Egress::udp(rest.parse::<SocketAddr>()?).await?,
        "tcp" => Egress::tcp(rest.parse::<SocketAddr>()?).await?,
        other => bail!("unsupported sink protocol <{other}>"),
    })
}

#[derive(Clone)]
pub struct Capabilities {
    call: Call<CapabilityRequest, CapabilityResponse>,
    last: Stored<CapabilityResponse>,
}

impl Capabilities {
    fn create(shell: &Shell, name: &str) -> Self {
        let transport = gnmi::capabilities(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "capabilities",
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

// The probe takes no operator input; the request is rebuilt at execute time.
managed_call_delegate!(Capabilities, execute(|this: &Capabilities, timeout| {
    this.call.set_request(CapabilityRequest {});
    this.call.execute(timeout)
}));

#[derive(Clone)]
pub struct Get {
    call: Call<GetRequest, GetResponse>,
    draft: Arc<Mutex<GetRequest>>,
    last: Stored<GetResponse>,
}

impl Get {
    fn create(shell: &Shell, name: &str) -> Self {
        let transport = gnmi::get(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "get",
            name,
            CallShape::Unary,
            transport,
            shell.config.metadata(),
        );
        let (handler, last) = handlers::store_last();
        call.set_response_handler(handler);
        let draft = Arc::new(Mutex::new(GetRequest::default()));
        let reset = Arc::clone(&draft);
        let slot = Arc::clone(&last);
        call.set_clear_hook(Box::new(move || {
            *reset.lock() = GetRequest::default();
            *slot.lock() = None;
        }));
        Self { call, draft, last }
    }

    fn update_draft(&self, mutate: impl Fn(&mut GetRequest)) {
        let mut draft = self.draft.lock();
        mutate(&mut draft);
        self.call.set_request(draft.clone());
    }
}

managed_call_delegate!(Get);

#[derive(Clone)]
pub struct Set {
    call: Call<SetRequest, SetResponse>,
    draft: Arc<Mutex<SetRequest>>,
    last: Stored<SetResponse>,
}

impl Set {
    fn create(shell: &Shell, name: &str) -> Self {
        let transport = gnmi::set(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "set",
            name,
            CallShape::Unary,
            transport,
            shell.config.metadata(),
        );
        let (handler, last) = handlers::store_last();
        call.set_response_handler(handler);
        let draft = Arc::new(Mutex::new(SetRequest::default()));
        let reset = Arc::clone(&draft);
        let slot = Arc::clone(&last);
        call.set_clear_hook(Box::new(move || {
            *reset.lock() = SetRequest::default();
            *slot.lock() = None;
        }));
        Self { call, draft, last }
    }

    fn update_draft(&self, mutate: impl Fn(&mut SetRequest)) {
        let mut draft = self.draft.lock();
        mutate(&mut draft);
        self.call.set_request(draft.clone());
    }
}

managed_call_delegate!(Set);

/// Default subscribe handler: render and keep every inbound notification,
/// so nothing received before the operator attaches a sink is lost.
fn collect_records(
    records: Collected<Record>,
) -> grpcsh_core::ResponseHandler<SubscribeResponse> {
    Box::new(move |response| {
        records.lock().push(render::subscribe_record(&response));
    })
}

#[derive(Clone)]
pub struct Subscribe {
    call: Call<SubscribeRequest, SubscribeResponse>,
    list: Arc<Mutex<SubscriptionList>>,
    records: Collected<Record>,
}

impl Subscribe {
    fn create(shell: &Shell, name: &str, mode: ListMode, encoding: Encoding) -> Self {
        let transport = gnmi::subscribe(shell.channel.clone(), shell.config.compression);
        let call = Call::new(
            "subscribe",
            name,
            CallShape::Streaming,
            transport,
            shell.config.metadata(),
        );
        let records: Collected<Record> = Arc::new(Mutex::new(Vec::new()));
        call.set_response_handler(collect_records(Arc::clone(&records)));
        let list = Arc::new(Mutex::new(SubscriptionList {
            prefix: None,
            subscription: Vec::new(),
            mode: mode as i32,
            encoding: encoding as i32,
        }));
        let reset = Arc::clone(&list);
        let reset_records = Arc::clone(&records);
        call.set_clear_hook(Box::new(move || {
            reset.lock().subscription.clear();
            reset_records.lock().clear();
        }));
        Self {
            call,
            list,
            records,
        }
    }

    /// Adds one subscription and rebuilds the single pending subscribe
    /// message around the full list.
    fn add(&self, subscription: Subscription) {
        let mut list = self.list.lock();
        list.subscription.push(subscription);
        self.call
            .set_request(SubscribeRequest::subscribe(list.clone()));
    }

    /// Routes inbound notifications through a fresh sink. Records collected
    /// before this point stay readable; new ones go to the sink only.
    fn set_sink(&self, egress: Egress) {
        let sink = NotificationSink::spawn(egress);
        self.call
            .set_response_handler(sink.handler(render::subscribe_record));
    }
}

managed_call_delegate!(Subscribe);

#[cfg(test)]
mod tests {
    use super::*;
    use grpcsh_core::UpdateType;
    use grpcsh_proto::gnmi::{Notification, subscribe_response};

    #[test]
    fn notifications_are_kept_before_a_sink_is_attached() {
        let records: Collected<Record> = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collect_records(Arc::clone(&records));

        handler(SubscribeResponse {
            response: Some(subscribe_response::Response::SyncResponse(true)),
        });
        handler(SubscribeResponse {
            response: Some(subscribe_response::Response::Update(Notification {
                timestamp: 7,
                prefix: None,
                update: vec![],
                delete: vec![],
            })),
        });

        let records = records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].update_type, UpdateType::Sync);
        assert_eq!(records[1].timestamp, 7);
    }
}
