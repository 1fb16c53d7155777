use crate::context::HostContext;
use crate::dispatcher::Dispatcher;
use crate::fetch::FetchError;
use crate::framer;
use crate::output::protocol_pipe;
use crate::sandbox::{self, ModuleCatalog};
use lxbridge_core::BridgeConfig;
use lxbridge_plugin::Response;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    LoadFailed(String),
    #[error("failed to initialise host context: {0}")]
    Context(#[from] FetchError),
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hosts one module and serves the line protocol over a reader/writer pair.
pub struct Bridge {
    config: BridgeConfig,
    catalog: ModuleCatalog,
}

impl Bridge {
    pub fn new(config: BridgeConfig, catalog: ModuleCatalog) -> Self {
        Self { config, catalog }
    }

    /// Loads the module at `module_path`, announces readiness and answers
    /// requests until `reader` reaches end of input.
    ///
    /// Must run inside a [`tokio::task::LocalSet`]. On load failure one error
    /// line is written and [`BridgeError::LoadFailed`] is returned.
    pub async fn run<R, W>(&self, module_path: &Path, reader: R, writer: W) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + 'static,
    {
        let (sink, writer) = protocol_pipe(writer);
        let ctx = HostContext::new(sink.clone(), &self.config)?;
        let writer_task = tokio::task::spawn_local(writer.run());

        tracing::info!(path = %module_path.display(), "loading module");
        let handle = sandbox::load(module_path, &self.catalog, &ctx);

        let failure = handle.failure().map(str::to_owned);
        let served = match failure {
            Some(reason) => {
                sink.respond(Response::failure(None, reason.as_str()));
                Err(BridgeError::LoadFailed(reason))
            }
            None => {
                sink.respond(Response::ready());
                let dispatcher = Dispatcher::new(ctx.clone(), handle);
                framer::serve(reader, &dispatcher, &sink, self.config.max_line_bytes)
                    .await
                    .map_err(BridgeError::from)
            }
        };

        ctx.shutdown();
        sink.close();
        match writer_task.await {
            Ok(Ok(lines)) => tracing::debug!(lines, "protocol writer finished"),
            Ok(Err(e)) => tracing::error!("protocol writer failed: {e}"),
            Err(e) => tracing::error!("protocol writer task aborted: {e}"),
        }
        served
    }
}
