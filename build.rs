use std::io;
use std::io::ErrorKind;
use std::fs;

const PROTO_DIR: &str = "./protos/";
const PEER_PROTO: &str = "./protos/raft.proto";
const OUT_DIR: &str = "./generated/";

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed={}", PEER_PROTO);

    // Peer wire format, WAL and snapshot payloads, and KV commands all live in one proto file.
    match fs::create_dir(OUT_DIR) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir(OUT_DIR)
        .compile(&[PEER_PROTO], &[PROTO_DIR])
}
