//! Bake simulator settings from `.env` into the binary.
//!
//! Every `FLOWGUARD_*` variable found in the environment or in a `.env` file
//! is forwarded to the compiler, where `main.rs` reads it with `option_env!`.

const BAKED_VARS: &[&str] = &[
    "FLOWGUARD_DEVICE_ID",
    "FLOWGUARD_WS_HOST",
    "FLOWGUARD_WS_PORT",
    "FLOWGUARD_WS_PATH",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    for var in BAKED_VARS {
        println!("cargo:rerun-if-env-changed={}", var);
    }

    // A missing .env is fine, defaults apply
    let _ = dotenvy::dotenv();

    for var in BAKED_VARS {
        if let Ok(value) = std::env::var(var) {
            println!("cargo:rustc-env={}={}", var, value);
        }
    }
}
