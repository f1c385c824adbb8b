// config.rs — collision model cvars

use crate::error::{CmError, CmResult};

/// Runtime switches of the collision model, set like console variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmConfig {
    /// `cm_noAreas`: treat every area as connected.
    pub no_areas: bool,
    /// `cm_noCurves`: traces ignore patch surfaces.
    pub no_curves: bool,
    /// `cm_playerCurveClip`: point traces collide with patches.
    pub player_curve_clip: bool,
}

impl Default for CmConfig {
    fn default() -> Self {
        Self {
            no_areas: false,
            no_curves: false,
            player_curve_clip: true,
        }
    }
}

impl CmConfig {
    /// Sets a variable by its console name. Names are case-insensitive and
    /// values parse the way the console does: any non-zero number is on.
    pub fn set(&mut self, name: &str, value: &str) -> CmResult<()> {
        let on = parse_flag(name, value)?;
        match name.to_ascii_lowercase().as_str() {
            "cm_noareas" => self.no_areas = on,
            "cm_nocurves" => self.no_curves = on,
            "cm_playercurveclip" => self.player_curve_clip = on,
            _ => return Err(CmError::UnknownCvar(name.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        match name.to_ascii_lowercase().as_str() {
            "cm_noareas" => Some(self.no_areas),
            "cm_nocurves" => Some(self.no_curves),
            "cm_playercurveclip" => Some(self.player_curve_clip),
            _ => None,
        }
    }

    /// Applies `name value` lines, e.g. from a config file. Blank lines and
    /// `//` comments are skipped.
    pub fn apply_lines(&mut self, text: &str) -> CmResult<()> {
        for line in text.lines() {
            let line = line.split("//").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let name = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("").trim_matches('"');
            self.set(name, value)?;
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> CmResult<bool> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if v.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    v.parse::<f32>()
        .map(|f| f != 0.0)
        .map_err(|_| CmError::BadCvarValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}
