use std::env;

fn main() {
    // Packagers may stamp a distro-specific version into the binary.
    let version = env::var("ISOFETCH_VERSION_OVERRIDE")
        .or_else(|_| env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=ISOFETCH_VERSION={version}");

    println!("cargo:rerun-if-env-changed=ISOFETCH_VERSION_OVERRIDE");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
