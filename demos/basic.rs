use stamp_sampler::{Sampler, Workload, WorkloadFlags};

fn black_box_loop(_: &mut stamp_sampler::BenchArgs<'_>) {
    for i in 0..1_000 {
        std::hint::black_box(i);
    }
}

const LOOP: Workload = Workload::new("black_box_loop", "1000 black_box calls", black_box_loop)
    .with_flags(WorkloadFlags::NO_VZ);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let mut sampler = match Sampler::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("setup failed: {e}");
            std::process::exit(1);
        }
    };
    sampler.run(&LOOP);
}
