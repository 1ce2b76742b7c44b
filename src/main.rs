use dspsync::{RunOptions, read_write};
use tracing::{Level, error, info};
use tracing_subscriber::{
    fmt::{Layer as FmtLayer, writer::MakeWriterExt},
    prelude::*,
};

fn usage() -> ! {
    eprintln!(
        "usage: dspsync [--device PATH] [--rate HZ] [--bits N] [--mmap] \
         [--exclusive] [--simulate] [--debug] [PERIOD [REPETITIONS]]"
    );
    std::process::exit(1);
}

fn parse_args(options: &mut RunOptions) -> bool {
    let mut debug = false;
    let mut positional = 0;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--device" => match args.next() {
                Some(path) => options.device = path,
                None => usage(),
            },
            "--rate" => match args.next().and_then(|v| v.parse().ok()) {
                Some(rate) => options.sample_rate = rate,
                None => usage(),
            },
            "--bits" => match args.next().and_then(|v| v.parse().ok()) {
                Some(bits) => options.bits = bits,
                None => usage(),
            },
            "--mmap" => options.memory_map = true,
            "--exclusive" => options.exclusive = true,
            "--simulate" => options.simulate_stalls = true,
            "--debug" => debug = true,
            "-h" | "--help" => usage(),
            value => {
                let Ok(number) = value.parse::<i64>() else {
                    usage();
                };
                match positional {
                    0 => options.period = number,
                    1 => {
                        if number < 0 {
                            usage();
                        }
                        options.repetitions = number as u32;
                    }
                    _ => usage(),
                }
                positional += 1;
            }
        }
    }
    debug
}

fn main() {
    let mut options = RunOptions::default();
    let debug = parse_args(&mut options);

    let level = if debug { Level::DEBUG } else { Level::INFO };
    let stdout_layer = FmtLayer::new().with_writer(std::io::stdout.with_max_level(level));
    tracing_subscriber::registry().with(stdout_layer).init();

    info!(
        device = %options.device,
        rate = options.sample_rate,
        period = options.period,
        repetitions = options.repetitions,
        mmap = options.memory_map,
        "starting duplex loop"
    );
    if let Err(err) = read_write(&options) {
        error!(%err, "duplex loop failed");
        std::process::exit(1);
    }
    info!("duplex loop completed");
}
