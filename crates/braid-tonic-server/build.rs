/// Builds the gRPC server code for `proto/echo.proto` with `tonic-prost-build`
/// and writes a file descriptor set next to it for server reflection.
///
/// Generated code is included from `src/server/proto.rs`:
///
/// ```rust,ignore
/// tonic::include_proto!("braid.echo.v1");
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("echo_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .build_client(false)
        .compile_with_config(config, &["proto/echo.proto"], &["proto"])
        .unwrap();
}
