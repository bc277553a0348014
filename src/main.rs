use clap::Parser;
use libcollider::evaluate;
use libcollider::flow::render_flow;
use libcollider::opencv::{highgui, imgcodecs, prelude::*};
use libcollider::prelude::*;
use libcollider::utils::imread;
use libcollider::viewer::{DEFAULT_SHOWN, HighGuiWindow, ImageFileWriter, WINDOW_NAME};
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Finds sparse correspondences between two images and shows a random subsample of them
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Pre-trained correspondence model
    model: PathBuf,

    /// First image
    image1: PathBuf,

    /// Second image
    image2: PathBuf,

    /// Write the last displayed frame to this image file on exit
    output: Option<PathBuf>,

    /// Use OpenCL hardware acceleration while matching
    #[arg(long)]
    opencl: bool,

    /// Approximate number of correspondences drawn per frame
    #[arg(long, default_value_t = DEFAULT_SHOWN)]
    shown: usize,

    /// Ground truth optical flow (.flo) to evaluate the correspondences against
    #[arg(short, long)]
    groundtruth: Option<PathBuf>,

    /// Also show every correspondence colour coded by its flow
    #[arg(long)]
    flow: bool,

    /// Lowe's ratio test threshold
    #[arg(long, default_value_t = MatchingParams::default().match_ratio)]
    match_ratio: f32,

    /// Share of the best matches to keep
    #[arg(long, default_value_t = MatchingParams::default().match_keep_ratio)]
    match_keep_ratio: f32,
}

fn main() -> Result<(), ViewerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let params = MatchingParams {
        use_opencl: args.opencl,
        match_ratio: args.match_ratio,
        match_keep_ratio: args.match_keep_ratio,
    };
    params.validate()?;

    info!("load model: {:?}", args.model);
    let model = CorrespondenceModel::load(&args.model)?;
    info!("done");

    let from = imread(&args.image1, imgcodecs::IMREAD_COLOR)?;
    let to = imread(&args.image2, imgcodecs::IMREAD_COLOR)?;

    let now = std::time::Instant::now();
    let corr = model.find_correspondences(&from, &to, &params)?;
    info!("Found {} matches in {:?}.", corr.len(), now.elapsed());

    if let Some(groundtruth) = &args.groundtruth {
        let flow = evaluate::read_ground_truth(groundtruth)?;
        match evaluate::evaluate(&corr, flow)? {
            Some(s) => info!(
                "EPE mean:{:.3} median:{:.3} max:{:.3} <1px:{:.1}% <3px:{:.1}% <5px:{:.1}% ({} evaluated, {} skipped)",
                s.mean,
                s.median,
                s.max,
                s.within[0] * 100.0,
                s.within[1] * 100.0,
                s.within[2] * 100.0,
                s.evaluated,
                s.skipped
            ),
            None => warn!("No correspondence has ground truth in {:?}", groundtruth),
        }
    }

    let canvas = Canvas::compose(&from, &to)?;

    if args.flow {
        let flow_img = render_flow(from.size()?, &corr)?;
        highgui::named_window("Flow", highgui::WINDOW_AUTOSIZE)?;
        highgui::imshow("Flow", &flow_img)?;
    }

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let renderer = Renderer::new(StdRng::seed_from_u64(seed)).shown(args.shown);
    let mut viewer = Viewer::new(renderer, args.output.clone());
    let mut window = HighGuiWindow::open(WINDOW_NAME)?;
    let session = viewer.run(&canvas, &corr, &mut window, &mut ImageFileWriter)?;
    debug!("viewer drew {} frames", session.frames);
    match session.saved {
        Some(path) => info!("Last frame saved to {:?}", path),
        None => info!("Done, no output path given"),
    }
    Ok(())
}
