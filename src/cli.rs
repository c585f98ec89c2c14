//! Command-line argument parsing for the redaudio loopback simulation

const DEFAULT_PACKETS: u32 = 500;
const DEFAULT_LOSS_PERCENT: f64 = 10.0;

/// Parse command line arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub validate: bool,
    pub help: bool,
    /// Number of 20 ms frames to send
    pub packets: u32,
    /// Simulated network loss, 0-100
    pub loss_percent: f64,
    pub seed: Option<u64>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            validate: false,
            help: false,
            packets: DEFAULT_PACKETS,
            loss_percent: DEFAULT_LOSS_PERCENT,
            seed: None,
        }
    }
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argument vector whose first element is the program name.
///
/// Unknown flags and unparseable values are ignored.
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--packets" => {
                if let Some(value) = args.get(i + 1) {
                    i += 1;
                    if let Ok(packets) = value.parse() {
                        result.packets = packets;
                    }
                }
            }
            "--loss" => {
                if let Some(value) = args.get(i + 1) {
                    i += 1;
                    if let Ok(loss) = value.parse::<f64>() {
                        if loss.is_finite() {
                            result.loss_percent = loss.clamp(0.0, 100.0);
                        }
                    }
                }
            }
            "--seed" => {
                if let Some(value) = args.get(i + 1) {
                    i += 1;
                    result.seed = value.parse().ok();
                }
            }
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("redaudio - RFC 2198 redundant audio loopback simulation\n");
    println!("USAGE:");
    println!("    redaudio [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --packets N         Number of 20 ms frames to send (default: {})", DEFAULT_PACKETS);
    println!("    --loss PERCENT      Simulated network loss (default: {})", DEFAULT_LOSS_PERCENT);
    println!("    --seed N            Seed the loss pattern for a repeatable run");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    RED_PAYLOAD_TYPE, OPUS_PAYLOAD_TYPE, RED_NUM_REDUNDANT_ENCODINGS,");
    println!("    RED_ENABLED, RED_MAX_AUDIO_PAYLOAD_SIZE, RED_MAX_HISTORY_SIZE,");
    println!("    RED_MAX_OUT_OF_ORDER_DISTANCE, RUST_LOG");
}
