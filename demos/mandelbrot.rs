//! # Mandelbrot
//!
//! Renders the Mandelbrot set with a 2-D build dispatch: every worker
//! claims rectangular tiles and writes iteration counts into a shared
//! `Uint8` view. The coordinator prints the result as ASCII once the
//! task's done callback fires.
//!
//! Run: `cargo run --example mandelbrot`
//! Verbose: `RUST_LOG=multicore=debug cargo run --example mandelbrot`

use multicore::prelude::*;
use tracing_subscriber::EnvFilter;

const WIDTH: i32 = 96;
const HEIGHT: i32 = 40;
const MAX_ITER: u32 = 255;

fn escape_time(cx: f64, cy: f64) -> u32 {
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut n = 0;
    while n < MAX_ITER && x * x + y * y <= 4.0 {
        let t = x * x - y * y + cx;
        y = 2.0 * x * y + cy;
        x = t;
        n += 1;
    }
    n
}

fn registry(_setup: &WorkerSetup) -> Result<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    registry.register("mandelbrot", |inv| {
        let (rows, cols) = inv
            .ranges_2d()
            .ok_or_else(|| Error::kernel("mandelbrot", "expected a 2-D tile"))?;
        let (x0, y0, scale) = (inv.number(0)?, inv.number(1)?, inv.number(2)?);
        let out = inv.output_view()?;
        for row in rows {
            for col in cols.clone() {
                let n = escape_time(x0 + col as f64 * scale, y0 + row as f64 * scale * 2.0);
                out.set((row * WIDTH + col) as usize, n as f64);
            }
        }
        Ok(())
    });
    Ok(registry)
}

fn render(view: &TypedView) {
    const RAMP: &[u8] = b" .:-=+*#%@";
    for row in view.to_vec().chunks(WIDTH as usize) {
        let line: String = row
            .iter()
            .map(|&n| {
                if n as u32 >= MAX_ITER {
                    '@'
                } else {
                    RAMP[(n as usize * (RAMP.len() - 1)) / MAX_ITER as usize] as char
                }
            })
            .collect();
        println!("{line}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("multicore=info".parse().map_err(
            |e| Error::InvalidConfig(format!("bad log directive: {e}")),
        )?))
        .init();

    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    let mut runtime = Multicore::new(RuntimeConfig::with_workers(workers), registry)?;

    let image = TypedView::whole(
        SharedBuffer::new((WIDTH * HEIGHT) as usize)?,
        ElementType::Uint8,
    );
    let space = IndexSpace::two(0..HEIGHT, 0..WIDTH)?;
    let task = Task::build("mandelbrot", image.clone(), space)
        .args([-2.2, -1.2, 3.2 / WIDTH as f64])
        .on_done(|runtime| {
            println!("rendered on {} workers", runtime.num_workers());
            Ok(())
        });

    let mut ticket = runtime.submit(task)?.into_ticket();
    runtime.wait(&mut ticket)?;
    render(&image);

    runtime.shutdown()
}
