//! Static try-on: composite a garment photo onto a subject photo at a fixed
//! body ratio. One-shot counterpart of the streaming server; any failure is
//! reported and exits non-zero.

use anyhow::{bail, Context, Result};
use opencv::core::Vector;
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use kisekae_mirror::overlay::{overlay_image, ratio_placement, resize_garment};

const DEFAULT_BODY_RATIO: f32 = 0.55;
const DEFAULT_VERTICAL_RATIO: f32 = 0.25;

fn usage() -> ! {
    eprintln!("usage: static_tryon <subject> <garment> <output> [--ratio R] [--vertical V]");
    std::process::exit(2);
}

struct Args {
    subject_path: String,
    garment_path: String,
    output_path: String,
    body_ratio: f32,
    vertical_ratio: f32,
}

fn parse_args() -> Result<Args> {
    let mut positional: Vec<String> = Vec::new();
    let mut body_ratio = DEFAULT_BODY_RATIO;
    let mut vertical_ratio = DEFAULT_VERTICAL_RATIO;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ratio" => {
                let value = args.next().unwrap_or_else(|| usage());
                body_ratio = value
                    .parse()
                    .with_context(|| format!("invalid --ratio value: {value}"))?;
            }
            "--vertical" => {
                let value = args.next().unwrap_or_else(|| usage());
                vertical_ratio = value
                    .parse()
                    .with_context(|| format!("invalid --vertical value: {value}"))?;
            }
            _ => positional.push(arg),
        }
    }

    if positional.len() != 3 {
        usage();
    }
    let mut positional = positional.into_iter();
    Ok(Args {
        subject_path: positional.next().unwrap(),
        garment_path: positional.next().unwrap(),
        output_path: positional.next().unwrap(),
        body_ratio,
        vertical_ratio,
    })
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let mut subject = imgcodecs::imread(&args.subject_path, imgcodecs::IMREAD_COLOR)
        .with_context(|| format!("failed to read {}", args.subject_path))?;
    if subject.empty() {
        bail!("failed to decode subject image: {}", args.subject_path);
    }

    // アルファチャネルを保持して読む
    let garment = imgcodecs::imread(&args.garment_path, imgcodecs::IMREAD_UNCHANGED)
        .with_context(|| format!("failed to read {}", args.garment_path))?;
    if garment.empty() {
        bail!("failed to decode garment image: {}", args.garment_path);
    }

    let placement = ratio_placement(
        subject.cols(),
        subject.rows(),
        garment.cols(),
        garment.rows(),
        args.body_ratio,
        args.vertical_ratio,
    )?;

    // 一発ものなので高品質なLanczosでリサイズする
    let resized = resize_garment(
        &garment,
        placement.width,
        placement.height,
        imgproc::INTER_LANCZOS4,
    )?;
    overlay_image(&mut subject, &resized, placement.x_offset, placement.y_offset)?;

    let ok = imgcodecs::imwrite(&args.output_path, &subject, &Vector::new())
        .with_context(|| format!("failed to write {}", args.output_path))?;
    if !ok {
        bail!("failed to write {}", args.output_path);
    }

    println!("Saved: {}", args.output_path);
    Ok(())
}
