use std::process::Command;

fn main() {
    for (var, key) in [
        ("TARGET", "BROKERRPC_BUILD_TARGET"),
        ("PROFILE", "BROKERRPC_BUILD_PROFILE"),
    ] {
        if let Ok(value) = std::env::var(var) {
            println!("cargo:rustc-env={key}={value}");
        }
        println!("cargo:rerun-if-env-changed={var}");
    }

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    if let Ok(output) = Command::new(rustc).arg("--version").output() {
        if output.status.success() {
            let version = String::from_utf8_lossy(&output.stdout);
            println!("cargo:rustc-env=BROKERRPC_RUSTC={}", version.trim());
        }
    }
}
