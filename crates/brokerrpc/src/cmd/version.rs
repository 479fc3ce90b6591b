use brokerrpc_client::{
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CALL_TIMEOUT, DEFAULT_INITIAL_CAP, DEFAULT_MAX_CAP,
    DEFAULT_MAX_IDLE, DEFAULT_RECONNECT_DELAY,
};
use brokerrpc_wire::{FRAME_OVERHEAD, MAX_BODY_LEN};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

fn build_env(value: Option<&'static str>) -> &'static str {
    value.unwrap_or("unknown")
}

pub fn run(args: VersionArgs) -> CliResult<i32> {
    let version = env!("CARGO_PKG_VERSION");
    if !args.extended {
        println!("brokerrpc {version}");
        return Ok(SUCCESS);
    }

    println!("brokerrpc {version}");
    println!(
        "build: target={} profile={} os={} arch={}",
        build_env(option_env!("BROKERRPC_BUILD_TARGET")),
        build_env(option_env!("BROKERRPC_BUILD_PROFILE")),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!("rustc: {}", build_env(option_env!("BROKERRPC_RUSTC")));
    println!(
        "features: client={}, amqp={}, cli=true",
        cfg!(feature = "client"),
        cfg!(feature = "amqp")
    );
    println!("wire: header={FRAME_OVERHEAD}B max_body={MAX_BODY_LEN}B");
    println!(
        "defaults: reconnect={}s pool={}/{}/{} acquire={}s call={}s",
        DEFAULT_RECONNECT_DELAY.as_secs(),
        DEFAULT_INITIAL_CAP,
        DEFAULT_MAX_IDLE,
        DEFAULT_MAX_CAP,
        DEFAULT_ACQUIRE_TIMEOUT.as_secs(),
        DEFAULT_CALL_TIMEOUT.as_secs()
    );

    Ok(SUCCESS)
}
