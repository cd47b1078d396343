fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile the CSI definitions (server for the plugin, client for tests)
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/csi.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/csi.proto");

    Ok(())
}
