//! Point-mass navigation with a hazard disc.
//!
//! A point mass with drag is pushed by a 2-D acceleration towards a goal.
//! A circular hazard sits roughly between the start and the goal, so the
//! shortest path crosses it: every step spent inside the hazard costs 1.
//!
//! Observation (8): position, velocity, goal offset, hazard offset.
//! Action (2): acceleration, clipped to `[-1, 1]`.

use constrained_rl::environment::{EnvError, EnvReset, EnvStep, Frame, Info, RenderMode, SafeEnv};
use constrained_rl::{EnvSpaces, Space};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const OBS_SIZE: usize = 8;
pub const ACTION_DIM: usize = 2;

const ARENA: f32 = 2.0;
const DT: f32 = 0.1;
const DRAG: f32 = 0.9;
const GOAL_RADIUS: f32 = 0.2;
const HAZARD_RADIUS: f32 = 0.5;
const PROGRESS_SCALE: f32 = 10.0;
const GOAL_BONUS: f32 = 1.0;
const FRAME_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct PointHazardEnv {
    rng: StdRng,
    horizon: usize,
    t: usize,
    pos: [f32; 2],
    vel: [f32; 2],
    goal: [f32; 2],
    hazard: [f32; 2],
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

impl PointHazardEnv {
    pub fn new(seed: u64, horizon: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            horizon,
            t: 0,
            pos: [0.0; 2],
            vel: [0.0; 2],
            goal: [0.0; 2],
            hazard: [0.0; 2],
        }
    }

    fn sample_point(&mut self) -> [f32; 2] {
        [self.rng.gen_range(-ARENA..ARENA), self.rng.gen_range(-ARENA..ARENA)]
    }

    fn observation(&self) -> Vec<f32> {
        vec![
            self.pos[0],
            self.pos[1],
            self.vel[0],
            self.vel[1],
            self.goal[0] - self.pos[0],
            self.goal[1] - self.pos[1],
            self.hazard[0] - self.pos[0],
            self.hazard[1] - self.pos[1],
        ]
    }

    pub fn in_hazard(&self) -> bool {
        distance(self.pos, self.hazard) < HAZARD_RADIUS
    }

    fn draw(&self) -> Frame {
        let mut frame = Frame::black(FRAME_SIZE, FRAME_SIZE);
        let to_cell = |p: f32| (((p + ARENA) / (2.0 * ARENA)) * (FRAME_SIZE - 1) as f32).round() as usize;
        let cell_size = 2.0 * ARENA / FRAME_SIZE as f32;

        for y in 0..FRAME_SIZE {
            for x in 0..FRAME_SIZE {
                let p = [x as f32 * cell_size - ARENA, y as f32 * cell_size - ARENA];
                let rgb = if distance(p, self.hazard) < HAZARD_RADIUS {
                    [160, 30, 30]
                } else if distance(p, self.goal) < GOAL_RADIUS {
                    [30, 160, 30]
                } else {
                    continue;
                };
                let i = (y * FRAME_SIZE + x) * Frame::CHANNELS;
                frame.pixels[i..i + Frame::CHANNELS].copy_from_slice(&rgb);
            }
        }

        let (x, y) = (to_cell(self.pos[0]), to_cell(self.pos[1]));
        let i = (y * FRAME_SIZE + x) * Frame::CHANNELS;
        frame.pixels[i..i + Frame::CHANNELS].copy_from_slice(&[255, 255, 255]);
        frame
    }
}

impl SafeEnv for PointHazardEnv {
    fn n_agents(&self) -> usize {
        1
    }

    fn spaces(&self) -> EnvSpaces {
        let bound = 2.0 * ARENA + 1.0;
        EnvSpaces {
            observation: Space::boxed(-bound, bound, OBS_SIZE),
            shared_observation: Space::boxed(-bound, bound, OBS_SIZE),
            action: Space::boxed(-1.0, 1.0, ACTION_DIM),
        }
    }

    fn reset(&mut self) -> EnvReset {
        self.t = 0;
        self.vel = [0.0; 2];
        self.pos = self.sample_point();
        self.goal = self.sample_point();
        while distance(self.pos, self.goal) < 4.0 * HAZARD_RADIUS {
            self.goal = self.sample_point();
        }
        let jitter = [self.rng.gen_range(-0.2..0.2), self.rng.gen_range(-0.2..0.2)];
        self.hazard = [
            0.5 * (self.pos[0] + self.goal[0]) + jitter[0],
            0.5 * (self.pos[1] + self.goal[1]) + jitter[1],
        ];

        let obs = self.observation();
        EnvReset {
            shared_obs: obs.clone(),
            obs,
            avail_actions: vec![1.0; ACTION_DIM],
        }
    }

    fn step(&mut self, actions: &[f32]) -> EnvStep {
        let before = distance(self.pos, self.goal);
        for axis in 0..2 {
            let accel = actions.get(axis).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
            self.vel[axis] = self.vel[axis] * DRAG + accel * DT;
            self.pos[axis] = (self.pos[axis] + self.vel[axis] * DT).clamp(-ARENA, ARENA);
        }
        self.t += 1;

        let after = distance(self.pos, self.goal);
        let reached = after < GOAL_RADIUS;
        let reward = PROGRESS_SCALE * (before - after) + if reached { GOAL_BONUS } else { 0.0 };
        let cost = if self.in_hazard() { 1.0 } else { 0.0 };
        let done = reached || self.t >= self.horizon;

        let mut info = Info::new();
        info.insert("cost".to_string(), cost);
        info.insert("goal_distance".to_string(), after);

        let obs = self.observation();
        EnvStep {
            shared_obs: obs.clone(),
            obs,
            rewards: vec![reward],
            costs: vec![cost],
            dones: vec![done],
            infos: vec![info],
            avail_actions: vec![1.0; ACTION_DIM],
        }
    }

    fn render(&mut self, mode: RenderMode) -> Result<Option<Frame>, EnvError> {
        match mode {
            RenderMode::Human => {
                println!(
                    "t={:>3} pos=({:+.2}, {:+.2}) goal=({:+.2}, {:+.2}) hazard={}",
                    self.t,
                    self.pos[0],
                    self.pos[1],
                    self.goal[0],
                    self.goal[1],
                    self.in_hazard()
                );
                Ok(None)
            }
            RenderMode::RgbArray => Ok(Some(self.draw())),
        }
    }
}
