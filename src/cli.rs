use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
	/// Section scope to monitor
	#[arg(short, long)]
	pub section: String,

	/// Reference encodings JSON file (ignored when a backend URL is configured)
	#[arg(short, long, default_value = "encodings.json")]
	pub encodings: String,

	/// Listen address override for the stream server
	#[arg(short, long)]
	pub listen: Option<String>,

	/// Output debug information
	#[arg(short, long)]
	pub debug: bool,

	/// Minimum detector confidence for a face region
	#[arg(short = 'c', long, default_value_t = 0.5)]
	pub min_confidence: f32,

	/// Face detector 'deploy' prototxt file
	#[arg(short, long, default_value = "models/deploy.prototxt")]
	pub proto: String,

	/// Face detector Caffe model
	#[arg(short, long, default_value = "models/res10_300x300_ssd_iter_140000.caffemodel")]
	pub model: String,

	/// Torch face embedding model
	#[arg(long, default_value = "models/openface_nn4.small2.v1.t7")]
	pub embedder: String,
}

pub fn parse_args() -> Args {
	Args::parse()
}
