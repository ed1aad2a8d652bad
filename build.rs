fn main() {
    println!("cargo:rerun-if-env-changed=SCL_VERSION");
    if let Ok(version) = std::env::var("SCL_VERSION") {
        println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    }
}
