/// Values used when neither the config file nor the command line sets an option.
pub struct DefaultsConfig {
    pub num_samples: usize,
    pub burn_in: usize,
    pub initial_cluster_count: usize,
    pub alpha: f64,
    pub seed: u64,

    pub correlation_enabled: bool,
    pub rt_window: f64,
    pub p0: f64,
    pub p1: f64,
    pub alpha0: f64,
    pub alpha1: f64,

    pub retention_time_enabled: bool,
    pub retention_time_sd: f64,
    pub retention_time_prior_kappa: f64,

    pub adducts: Vec<String>,
    pub max_positions_per_adduct: usize,
    pub min_distribution_value: f64,
    pub mass_precision_ppm: f64,
    pub intensity_prior_kappa: f64,
    pub intensity_kappa: f64,
    pub retention_time_prediction_sd: f64,
    pub fixed_cluster_count: usize,
    pub identification_peaks: usize,
    pub min_supporting_features: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            num_samples: 20,
            burn_in: 30,
            initial_cluster_count: 10,
            alpha: 1.0,
            seed: 42,
            correlation_enabled: true,
            rt_window: 30.0,
            p0: 0.97,
            p1: 0.001,
            alpha0: 2.0,
            alpha1: 10.0,
            retention_time_enabled: true,
            retention_time_sd: 2.5,
            retention_time_prior_kappa: 1e-10,
            adducts: vec!["M+H".to_string(), "M-H".to_string()],
            max_positions_per_adduct: 3,
            min_distribution_value: 1e-5,
            mass_precision_ppm: 3.0,
            intensity_prior_kappa: 1e-16,
            intensity_kappa: 1e-10,
            retention_time_prediction_sd: 30.0,
            fixed_cluster_count: 10,
            identification_peaks: 3,
            min_supporting_features: 2,
        }
    }
}
