use std::env;
use std::path::PathBuf;

fn main() {
    // protoc is required to compile proto files; protoc-bin-vendored ships a
    // matching binary so the build doesn't depend on a system install.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    println!("cargo:rerun-if-changed=proto/vsm.proto");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let mut config = prost_build::Config::new();
    config.out_dir(&out_dir);
    config
        .compile_protos(&["proto/vsm.proto"], &["proto"])
        .expect("failed to compile proto/vsm.proto");
}
