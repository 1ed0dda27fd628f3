use clap::Parser;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use volmatch::{
    AngularLimit, Band, EngineConfig, ExtractConfig, Finder, FrequencyMask, GridConfig,
    HillClimbConfig, Limits, LocalGrid, Normalization, Orientation, Particle, ParticleList,
    PerturbationConfig, PointGroup, RefineConfig, RefineStrategy, RefineSummary, Region,
    SamplingConfig, SearchConfig, SelectionFilters, SelectionReport, ShiftLimit, Symmetry,
    Template, Volume,
};

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "VolMatch CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output for performance profiling.
    #[arg(long)]
    trace: bool,
    /// Write the best-score map as raw little-endian f32 (search mode only).
    #[arg(long, value_name = "FILE")]
    score_map: Option<PathBuf>,
}

/// Headerless little-endian `f32` samples, x fastest.
#[derive(Debug, Deserialize)]
struct RawVolumeJson {
    path: String,
    dims: [usize; 3],
    #[serde(default = "unit_sampling")]
    sampling: f64,
    #[serde(default)]
    label: Option<String>,
}

fn unit_sampling() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NormalizationConfig {
    Local,
    Global,
}

impl From<NormalizationConfig> for Normalization {
    fn from(value: NormalizationConfig) -> Self {
        match value {
            NormalizationConfig::Local => Normalization::Local,
            NormalizationConfig::Global => Normalization::Global,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EngineConfigJson {
    hi_res: f64,
    lo_res: f64,
    normalization: NormalizationConfig,
    min_var_fraction: f64,
}

impl Default for EngineConfigJson {
    fn default() -> Self {
        let cfg = EngineConfig::default();
        Self {
            hi_res: cfg.band.hi_res,
            lo_res: cfg.band.lo_res,
            normalization: NormalizationConfig::Local,
            min_var_fraction: cfg.min_var_fraction,
        }
    }
}

impl EngineConfigJson {
    fn to_engine(&self) -> EngineConfig {
        EngineConfig {
            band: Band::new(self.hi_res, self.lo_res),
            normalization: self.normalization.into(),
            min_var_fraction: self.min_var_fraction,
        }
    }
}

/// Single-axis tilt range, degrees.
#[derive(Debug, Deserialize)]
struct WedgeJson {
    #[serde(default = "default_tilt_axis")]
    tilt_axis_deg: f64,
    min_tilt_deg: f64,
    max_tilt_deg: f64,
}

fn default_tilt_axis() -> f64 {
    90.0
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SearchConfigJson {
    view_step_deg: f64,
    angle_step_deg: f64,
    threshold: f32,
    auto_fraction: f32,
    min_distance: f64,
    max_hits: usize,
    wrap: bool,
    interpolate: bool,
    bin: usize,
    parallel: bool,
    region_center: Option<[f64; 3]>,
    region_radius: Option<f64>,
    /// Restricts the orientation grid to a window around this pose.
    reference_direction: Option<[f64; 3]>,
    reference_angle_deg: f64,
    reference_view_limit_deg: f64,
    reference_angle_limit_deg: f64,
}

impl Default for SearchConfigJson {
    fn default() -> Self {
        let cfg = SearchConfig::default();
        Self {
            view_step_deg: cfg.sampling.view_step.to_degrees(),
            angle_step_deg: cfg.sampling.angle_step.to_degrees(),
            threshold: cfg.extract.threshold,
            auto_fraction: cfg.extract.auto_fraction,
            min_distance: cfg.extract.min_distance,
            max_hits: cfg.extract.max_hits,
            wrap: cfg.extract.wrap,
            interpolate: cfg.extract.interpolate,
            bin: cfg.bin,
            parallel: cfg.parallel,
            region_center: None,
            region_radius: None,
            reference_direction: None,
            reference_angle_deg: 0.0,
            reference_view_limit_deg: cfg.sampling.limits.view.to_degrees(),
            reference_angle_limit_deg: cfg.sampling.limits.angle.to_degrees(),
        }
    }
}

impl SearchConfigJson {
    fn to_search(
        &self,
        engine: EngineConfig,
        refine: Option<RefineConfig>,
    ) -> Result<SearchConfig, Box<dyn std::error::Error>> {
        let region = match (self.region_center, self.region_radius) {
            (Some(c), Some(radius)) => Some(Region {
                center: Vector3::new(c[0], c[1], c[2]),
                radius,
            }),
            (None, None) => None,
            _ => return Err("search.region_center and search.region_radius must be set together".into()),
        };
        let reference = self.reference_direction.map(|[x, y, z]| {
            Orientation::new(Vector3::new(x, y, z), self.reference_angle_deg.to_radians())
        });
        Ok(SearchConfig {
            sampling: SamplingConfig {
                view_step: self.view_step_deg.to_radians(),
                angle_step: self.angle_step_deg.to_radians(),
                reference,
                limits: AngularLimit {
                    view: self.reference_view_limit_deg.to_radians(),
                    angle: self.reference_angle_limit_deg.to_radians(),
                },
            },
            engine,
            extract: ExtractConfig {
                threshold: self.threshold,
                auto_fraction: self.auto_fraction,
                min_distance: self.min_distance,
                max_hits: self.max_hits,
                wrap: self.wrap,
                interpolate: self.interpolate,
            },
            refine,
            bin: self.bin,
            region,
            parallel: self.parallel,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StrategyConfig {
    Grid,
    HillClimb,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RefineConfigJson {
    strategy: StrategyConfig,
    // Grid
    grid_view_step_deg: f64,
    grid_angle_step_deg: f64,
    grid_view_limit_deg: f64,
    grid_angle_limit_deg: f64,
    shift_step: f64,
    min_angle_step_deg: f64,
    min_shift_step: f64,
    grid_iterations: usize,
    // Hill climb
    shift_std: f64,
    view_std: f64,
    max_angle_deg: f64,
    max_scale: f64,
    hill_climb_iterations: usize,
    patience: usize,
    seed: u64,
    // Limits
    shift_radius: f64,
    shift_along: f64,
    shift_orthogonal: f64,
    view_limit_deg: f64,
    angle_limit_deg: f64,
    interpolate: bool,
}

impl Default for RefineConfigJson {
    fn default() -> Self {
        let grid = GridConfig::default();
        let hc = HillClimbConfig::default();
        let limits = Limits::default();
        Self {
            strategy: StrategyConfig::Grid,
            grid_view_step_deg: grid.local.view_step.to_degrees(),
            grid_angle_step_deg: grid.local.angle_step.to_degrees(),
            grid_view_limit_deg: grid.local.view_limit.to_degrees(),
            grid_angle_limit_deg: grid.local.angle_limit.to_degrees(),
            shift_step: grid.shift_step,
            min_angle_step_deg: grid.min_angle_step.to_degrees(),
            min_shift_step: grid.min_shift_step,
            grid_iterations: grid.max_iterations,
            shift_std: hc.perturbation.shift_std,
            view_std: hc.perturbation.view_std,
            max_angle_deg: hc.perturbation.max_angle.to_degrees(),
            max_scale: hc.perturbation.max_scale,
            hill_climb_iterations: hc.max_iterations,
            patience: hc.patience,
            seed: hc.seed,
            shift_radius: limits.shift.radius,
            shift_along: limits.shift.along,
            shift_orthogonal: limits.shift.orthogonal,
            view_limit_deg: limits.angular.view.to_degrees(),
            angle_limit_deg: limits.angular.angle.to_degrees(),
            interpolate: false,
        }
    }
}

impl RefineConfigJson {
    fn to_refine(&self) -> RefineConfig {
        let strategy = match self.strategy {
            StrategyConfig::Grid => RefineStrategy::Grid(GridConfig {
                local: LocalGrid {
                    view_step: self.grid_view_step_deg.to_radians(),
                    angle_step: self.grid_angle_step_deg.to_radians(),
                    view_limit: self.grid_view_limit_deg.to_radians(),
                    angle_limit: self.grid_angle_limit_deg.to_radians(),
                },
                shift_step: self.shift_step,
                min_angle_step: self.min_angle_step_deg.to_radians(),
                min_shift_step: self.min_shift_step,
                max_iterations: self.grid_iterations,
            }),
            StrategyConfig::HillClimb => RefineStrategy::HillClimb(HillClimbConfig {
                perturbation: PerturbationConfig {
                    shift_std: self.shift_std,
                    view_std: self.view_std,
                    max_angle: self.max_angle_deg.to_radians(),
                    max_scale: self.max_scale,
                },
                max_iterations: self.hill_climb_iterations,
                patience: self.patience,
                seed: self.seed,
            }),
        };
        RefineConfig {
            strategy,
            limits: Limits {
                shift: ShiftLimit {
                    radius: self.shift_radius,
                    along: self.shift_along,
                    orthogonal: self.shift_orthogonal,
                },
                angular: AngularLimit {
                    view: self.view_limit_deg.to_radians(),
                    angle: self.angle_limit_deg.to_radians(),
                },
            },
            interpolate: self.interpolate,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SelectConfigJson {
    min_fom: Option<f32>,
    fom_std_factor: Option<f64>,
    region_center: Option<[f64; 3]>,
    region_radius: Option<f64>,
    shell_distance: Option<f64>,
    min_distance: Option<f64>,
    min_angle_deg: Option<f64>,
    top_n: Option<usize>,
    top_percent: Option<f64>,
    /// Drop deselected particles from the output.
    compact: bool,
}

impl SelectConfigJson {
    fn to_filters(&self) -> Result<SelectionFilters, Box<dyn std::error::Error>> {
        let region = match (self.region_center, self.region_radius) {
            (Some(c), Some(radius)) => Some(Region {
                center: Vector3::new(c[0], c[1], c[2]),
                radius,
            }),
            (None, None) => None,
            _ => return Err("region_center and region_radius must be set together".into()),
        };
        Ok(SelectionFilters {
            min_fom: self.min_fom,
            fom_std_factor: self.fom_std_factor,
            region,
            shell_distance: self.shell_distance,
            min_distance: self.min_distance,
            min_angle: self.min_angle_deg.map(f64::to_radians),
            top_n: self.top_n,
            top_percent: self.top_percent,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    target: Option<RawVolumeJson>,
    template: Option<RawVolumeJson>,
    mask: Option<RawVolumeJson>,
    mask_radius: Option<f64>,
    wedge: Option<WedgeJson>,
    symmetry: String,
    /// Particles from a previous run; when set the search is skipped.
    particles_path: Option<String>,
    output_path: Option<String>,
    engine: EngineConfigJson,
    search: SearchConfigJson,
    refine: Option<RefineConfigJson>,
    select: SelectConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: None,
            template: None,
            mask: None,
            mask_radius: None,
            wedge: None,
            symmetry: "C1".to_string(),
            particles_path: None,
            output_path: None,
            engine: EngineConfigJson::default(),
            search: SearchConfigJson::default(),
            refine: None,
            select: SelectConfigJson::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ParticleRecord {
    id: usize,
    location: [f64; 3],
    #[serde(default)]
    box_origin: [f64; 3],
    direction: [f64; 3],
    angle_deg: f64,
    #[serde(default = "unit_sampling")]
    scale: f64,
    /// `null` marks a FOM that was never computed.
    #[serde(default)]
    fom: Vec<Option<f32>>,
    #[serde(default = "selected_default")]
    selected: bool,
    #[serde(default)]
    volume_id: String,
}

fn selected_default() -> bool {
    true
}

impl From<&Particle> for ParticleRecord {
    fn from(value: &Particle) -> Self {
        let dir = value.orientation.direction();
        Self {
            id: value.id,
            location: [value.location.x, value.location.y, value.location.z],
            box_origin: [value.box_origin.x, value.box_origin.y, value.box_origin.z],
            direction: [dir.x, dir.y, dir.z],
            angle_deg: value.orientation.angle().to_degrees(),
            scale: value.scale,
            fom: value
                .fom
                .iter()
                .map(|&f| f.is_finite().then_some(f))
                .collect(),
            selected: value.selected,
            volume_id: value.volume_id.clone(),
        }
    }
}

impl From<ParticleRecord> for Particle {
    fn from(value: ParticleRecord) -> Self {
        let [x, y, z] = value.location;
        let [dx, dy, dz] = value.direction;
        let [ox, oy, oz] = value.box_origin;
        let orientation = Orientation::new(Vector3::new(dx, dy, dz), value.angle_deg.to_radians());
        let mut particle = Particle::new(value.id, Vector3::new(x, y, z), orientation, f32::NAN)
            .with_box_origin(Vector3::new(ox, oy, oz))
            .with_volume_id(value.volume_id);
        if !value.fom.is_empty() {
            particle.fom = value.fom.into_iter().map(|f| f.unwrap_or(f32::NAN)).collect();
        }
        particle.scale = value.scale;
        particle.selected = value.selected;
        particle
    }
}

#[derive(Debug, Serialize)]
struct RefineRecord {
    refined: usize,
    improved: usize,
    converged: usize,
    budget_exhausted: usize,
}

impl From<RefineSummary> for RefineRecord {
    fn from(value: RefineSummary) -> Self {
        Self {
            refined: value.refined,
            improved: value.improved,
            converged: value.converged,
            budget_exhausted: value.budget_exhausted,
        }
    }
}

#[derive(Debug, Serialize)]
struct ShellRecord {
    center: [f64; 3],
    radius: f64,
}

#[derive(Debug, Serialize)]
struct FilterRecord {
    filter: &'static str,
    removed: usize,
}

#[derive(Debug, Serialize)]
struct SelectionRecord {
    removed: Vec<FilterRecord>,
    shell: Option<ShellRecord>,
    selected: usize,
}

impl From<SelectionReport> for SelectionRecord {
    fn from(value: SelectionReport) -> Self {
        Self {
            removed: value
                .removed
                .iter()
                .map(|c| FilterRecord {
                    filter: c.filter,
                    removed: c.removed,
                })
                .collect(),
            shell: value.shell.map(|s| ShellRecord {
                center: [s.center.x, s.center.y, s.center.z],
                radius: s.radius,
            }),
            selected: value.selected,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct SearchRecord {
    orientations: usize,
    found: usize,
    collapsed: usize,
    min_distance: f64,
    threshold: f32,
    threshold_lowered: bool,
}

#[derive(Debug, Serialize)]
struct Output {
    volume: String,
    search: Option<SearchRecord>,
    refinement: Option<RefineRecord>,
    selection: SelectionRecord,
    particles: Vec<ParticleRecord>,
}

#[derive(Debug, Deserialize)]
struct ParticleFile {
    particles: Vec<ParticleRecord>,
}

fn read_raw_volume(spec: &RawVolumeJson, fallback_label: &str) -> Result<Volume, Box<dyn std::error::Error>> {
    let bytes = fs::read(&spec.path)?;
    let count = spec.dims.iter().product::<usize>();
    if bytes.len() != count * 4 {
        return Err(format!(
            "{}: expected {} bytes for dims {:?}, found {}",
            spec.path,
            count * 4,
            spec.dims,
            bytes.len()
        )
        .into());
    }
    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let label = spec.label.clone().unwrap_or_else(|| {
        Path::new(&spec.path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(fallback_label)
            .to_string()
    });
    let volume = Volume::new(data, spec.dims)?
        .with_sampling(spec.sampling)
        .with_label(label);
    tracing::info!(path = %spec.path, dims = ?spec.dims, "volume loaded");
    Ok(volume)
}

fn write_raw_volume(path: &Path, volume: &Volume) -> Result<(), Box<dyn std::error::Error>> {
    let bytes: Vec<u8> = volume.data().iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes)?;
    tracing::info!(path = %path.display(), dims = ?volume.dims(), "volume written");
    Ok(())
}

fn build_template(config: &Config) -> Result<Template, Box<dyn std::error::Error>> {
    let spec = config
        .template
        .as_ref()
        .ok_or("template must be set in the config")?;
    let mut template = Template::new(read_raw_volume(spec, "template")?)?;
    match (&config.mask, config.mask_radius) {
        (Some(_), Some(_)) => return Err("set either mask or mask_radius, not both".into()),
        (Some(mask), None) => template = template.with_mask(read_raw_volume(mask, "mask")?)?,
        (None, Some(radius)) => template = template.with_spherical_mask(radius)?,
        (None, None) => {}
    }
    if let Some(w) = &config.wedge {
        template = template.with_frequency_mask(FrequencyMask::MissingWedge {
            tilt_axis: w.tilt_axis_deg.to_radians(),
            tilt_neg: w.min_tilt_deg.to_radians().abs(),
            tilt_pos: w.max_tilt_deg.to_radians().abs(),
        })?;
    }
    Ok(template)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("volmatch=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    let target_spec = config.target.as_ref().ok_or("target must be set in the config")?;
    let target = read_raw_volume(target_spec, "target")?;
    let symmetry: PointGroup = config.symmetry.parse()?;
    let filters = config.select.to_filters()?;
    filters.validate()?;

    let search_cfg = config.search.to_search(
        config.engine.to_engine(),
        config.refine.as_ref().map(RefineConfigJson::to_refine),
    )?;
    let finder = Finder::new(build_template(&config)?).with_config(search_cfg);

    let (mut particles, search, refinement) = match &config.particles_path {
        Some(path) => {
            let file: ParticleFile = serde_json::from_str(&fs::read_to_string(path)?)?;
            let loaded = file.particles.into_iter().map(Particle::from).collect();
            let mut list = ParticleList::from_particles(target.label(), loaded);
            let refinement = match &search_cfg.refine {
                Some(cfg) => Some(finder.refine(&target, &mut list, cfg)?),
                None => None,
            };
            if cli.score_map.is_some() {
                tracing::warn!("score map is only written in search mode");
            }
            (list, None, refinement)
        }
        None => {
            let outcome = finder.search(&target, &symmetry)?;
            if let Some(path) = &cli.score_map {
                write_raw_volume(path, &outcome.scores.to_volume()?)?;
            }
            let record = SearchRecord {
                orientations: outcome.orientations,
                found: outcome.found,
                collapsed: outcome.collapsed,
                min_distance: outcome.min_distance,
                threshold: outcome.threshold,
                threshold_lowered: outcome.threshold_lowered,
            };
            (outcome.particles, Some(record), outcome.refinement)
        }
    };

    let report = filters.apply(&mut particles, Some(&symmetry as &dyn Symmetry))?;
    if config.select.compact {
        particles.compact();
    }

    let output = Output {
        volume: target.label().to_string(),
        search,
        refinement: refinement.map(RefineRecord::from),
        selection: report.into(),
        particles: particles.iter().map(ParticleRecord::from).collect(),
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
