//! The interactive command loop.
//!
//! One line is one command. Service-specific commands (`gnmi ...`, `rib ...`)
//! build requests on named calls; the generic commands (`execute`, `wait`,
//! `cancel`, `clear`, `destroy`, `show`) drive any registered call through
//! its capability surface. Command failures are printed and the loop
//! continues; only end-of-input, `quit` or Ctrl-C end the session.

use crate::session::config::SessionConfig;
use anyhow::bail;
use core::time::Duration;
use grpcsh_core::CallRegistry;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tonic::transport::Channel;

/// Implements the engine's capability surface for a service wrapper by
/// delegating to its inner `call` field. `as_any` intentionally returns the
/// wrapper itself so typed registry lookups recover the builder state.
macro_rules! managed_call_delegate {
    ($wrapper:ty) => {
        managed_call_delegate!($wrapper, execute(|this: &$wrapper, timeout| this
            .call
            .execute(timeout)));
    };
    ($wrapper:ty, execute($build:expr)) => {
        impl grpcsh_core::ManagedCall for $wrapper {
            fn rpc_type(&self) -> &str {
                self.call.rpc_type()
            }
            fn name(&self) -> &str {
                self.call.name()
            }
            fn shape(&self) -> grpcsh_core::CallShape {
                self.call.shape()
            }
            fn status(&self) -> grpcsh_core::CallStatus {
                self.call.status()
            }
            fn execute(
                &self,
                timeout: Option<core::time::Duration>,
            ) -> grpcsh_core::Result<()> {
                ($build)(self, timeout)
            }
            fn has_live_handle(&self) -> bool {
                self.call.has_live_handle()
            }
            fn cancel(&self) {
                self.call.cancel()
            }
            fn pending_tasks(&self) -> usize {
                self.call.pending_tasks()
            }
            fn last_error(&self) -> Option<grpcsh_core::Error> {
                self.call.last_error()
            }
            fn clear(&self) {
                self.call.clear()
            }
            fn wait(
                &self,
                timeout: core::time::Duration,
            ) -> futures::future::BoxFuture<'_, ()> {
                Box::pin(self.call.wait(timeout))
            }
            fn describe(&self) -> String {
                grpcsh_core::ManagedCall::describe(&self.call)
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }
    };
}
pub(crate) use managed_call_delegate;

pub mod gnmi;
pub mod rib;

const HELP: &str = "\
generic commands:
  show                                 list all registered rpcs
  execute <type> <name> [timeout]      signal the rpc's worker (seconds)
  wait <type> <name> [timeout]         bounded join on the rpc's work queue
  cancel <type> <name>                 best-effort cancellation
  clear <type> <name>                  reset built requests and responses
  destroy <type> <name>                cancel (if live) and unregister
  help                                 this text
  quit | exit                          leave the shell

service commands:
  gnmi capabilities|get|set|subscribe ...   (try: gnmi help)
  rib version|modify ...                    (try: rib help)";

pub struct Shell {
    pub registry: CallRegistry,
    pub channel: Channel,
    pub config: SessionConfig,
}

impl Shell {
    pub fn new(channel: Channel, config: SessionConfig) -> Self {
        let rpc_types: Vec<&str> = grpcsh_proto::gnmi::RPC_TYPES
            .iter()
            .chain(grpcsh_proto::rib::RPC_TYPES)
            .copied()
            .collect();
        Self {
            registry: CallRegistry::with_types(&rpc_types),
            channel,
            config,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("connected to {}; type 'help' for commands", self.config.target);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("grpcsh> ");
            std::io::stdout().flush()?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            match self.dispatch(line.trim()).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("error: {e}"),
            }
        }
        println!();
        Ok(())
    }

    /// Runs one command line. `Ok(false)` ends the loop.
    async fn dispatch(&mut self, line: &str) -> anyhow::Result<bool> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, rest)) = tokens.split_first() else {
            return Ok(true);
        };
        match command {
            "help" => println!("{HELP}"),
            "show" => print!("{}", self.registry),
            "execute" => {
                let (rpc_type, name, timeout) = call_args(rest)?;
                self.registry.get(rpc_type, name)?.execute(timeout)?;
            }
            "wait" => {
                let (rpc_type, name, timeout) = call_args(rest)?;
                let call = self.registry.get(rpc_type, name)?;
                call.wait(timeout.unwrap_or(Duration::from_secs(10))).await;
                println!("{}", call.describe());
            }
            "cancel" => {
                let (rpc_type, name, _) = call_args(rest)?;
                self.registry.get(rpc_type, name)?.cancel();
            }
            "clear" => {
                let (rpc_type, name, _) = call_args(rest)?;
                self.registry.get(rpc_type, name)?.clear();
            }
            "destroy" => {
                let (rpc_type, name, _) = call_args(rest)?;
                self.registry.destroy(rpc_type, name, true)?;
            }
            "gnmi" => gnmi::command(self, rest).await?,
            "rib" => rib::command(self, rest)?,
            "quit" | "exit" => return Ok(false),
            other => bail!("unknown command <{other}>, try 'help'"),
        }
        Ok(true)
    }
}

fn call_args<'a>(args: &[&'a str]) -> anyhow::Result<(&'a str, &'a str, Option<Duration>)> {
    match args {
        [rpc_type, name] => Ok((*rpc_type, *name, None)),
        [rpc_type, name, timeout] => Ok((*rpc_type, *name, Some(parse_secs(timeout)?))),
        _ => bail!("expected: <rpc-type> <name> [timeout-seconds]"),
    }
}

pub(crate) fn parse_secs(arg: &str) -> anyhow::Result<Duration> {
    let secs: f64 = arg
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid timeout <{arg}>"))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("invalid timeout <{arg}>");
    }
    Ok(Duration::from_secs_f64(secs))
}
