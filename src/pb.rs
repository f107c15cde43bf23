// ABOUTME: Generated protobuf/tonic bindings for the coven.proto wire contract.

tonic::include_proto!("coven");
