fn main() -> Result<(), Box<dyn std::error::Error>> {
	prost_build::compile_protos(&["proto/privval.proto"], &["proto"])?;

	tonic_build::configure()
		.build_client(true)
		.build_server(true)
		.compile(&["proto/cosigner.proto"], &["proto"])?;

	Ok(())
}
