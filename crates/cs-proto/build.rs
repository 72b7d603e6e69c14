fn main() {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/codespace.proto"], &["proto"])
        .expect("failed to compile codespace.proto");

    println!("cargo:rerun-if-changed=proto/codespace.proto");
}
