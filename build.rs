// ABOUTME: Build script for code generation from the gateway's protobuf wire contract.

fn main() {
    tonic_build::compile_protos("proto/coven.proto")
        .expect("Failed to compile coven.proto. Is protoc installed?");
}
