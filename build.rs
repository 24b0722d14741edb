fn main() -> Result<(), Box<dyn std::error::Error>> {
    unsafe {
        std::env::set_var(
            "PROTOC",
            protoc_bin_vendored::protoc_bin_path().expect("bundled protoc binary"),
        );
    }
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/varbridge.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/varbridge.proto");
    Ok(())
}
