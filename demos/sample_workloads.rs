use stamp_sampler::{SamplerConfig, list_events, list_workloads, workload};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if std::env::var_os("STAMP_LIST").is_some() {
        println!("{}\n\n{}", list_events(), list_workloads());
        return;
    }
    let config = match SamplerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let workloads = match std::env::var("STAMP_WORKLOADS") {
        Ok(list) => workload::by_list(&list),
        Err(_) => Ok(workload::default_set(config.include_slow)),
    };
    let workloads = match workloads {
        Ok(w) => w,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let mut sampler = match stamp_sampler::Sampler::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("setup failed: {e}");
            std::process::exit(1);
        }
    };
    sampler.run_all(workloads);
}
