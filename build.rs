//! Build script for criproxy.
//!
//! Compiles the two vendored CRI proto packages (the legacy `runtime`
//! package and `runtime.v1alpha2`) into gRPC clients and servers.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(
            &["proto/runtime.proto", "proto/runtime_v1alpha2.proto"],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/runtime.proto");
    println!("cargo:rerun-if-changed=proto/runtime_v1alpha2.proto");

    Ok(())
}
