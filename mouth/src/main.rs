//! Mouth is a metrics aggregator speaking a StatsD-style line protocol over UDP.
//!
//! Clients send counters, timers and gauges as plain text datagrams. Mouth sums them up into
//! buckets of a fixed interval and, once an interval has passed, writes one document per
//! namespace into MongoDB.
//!
//! # Workspace Crates
//!
//! Mouth is split into the following workspace crates:
//!
//!  - `mouth`: Main entry point and command line interface.
//!  - [`mouth-common`]: Common utilities shared by all crates.
//!  - [`mouth-config`]: Static configuration for the CLI and server.
//!  - [`mouth-log`]: Error reporting and logging.
//!  - [`mouth-metrics`]: Line protocol, aggregation and flush documents.
//!  - [`mouth-server`]: UDP listener, document store and service wiring.
//!  - [`mouth-sink`]: Persistence of flushed documents.
//!  - [`mouth-statsd`]: Internal metrics of the server itself.
//!  - [`mouth-system`]: Foundational system components for the services.
//!
//! [`mouth-common`]: ../mouth_common/index.html
//! [`mouth-config`]: ../mouth_config/index.html
//! [`mouth-log`]: ../mouth_log/index.html
//! [`mouth-metrics`]: ../mouth_metrics/index.html
//! [`mouth-server`]: ../mouth_server/index.html
//! [`mouth-sink`]: ../mouth_sink/index.html
//! [`mouth-statsd`]: ../mouth_statsd/index.html
//! [`mouth-system`]: ../mouth_system/index.html

use std::process;

use mouth_log::Hub;

mod cli;
mod setup;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            mouth_log::ensure_error(&err);
            1
        }
    };

    Hub::current().client().map(|x| x.close(None));
    process::exit(exit_code);
}
