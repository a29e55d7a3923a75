//! Shell-script stand-ins for the GDAL command-line programs.
//!
//! Every script fails unless its input exists and copies that input to
//! the output, so [`GdalCliEngine`](raster_engine::GdalCliEngine) path
//! handling can be run end to end without GDAL.

use raster_engine::GdalCliConfig;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const GDALINFO: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "GDAL 0.0.0, fake"
    exit 0
fi
for last in "$@"; do :; done
[ -f "$last" ] || { echo "missing $last" >&2; exit 1; }
echo '{"coordinateSystem":{"wkt":"FAKE"},"geoTransform":[0,250,0,0,0,-250],"bands":[{"band":1}]}'
"#;

/// gdal_translate and gdalwarp: input is the second-to-last argument.
const COPY_LAST_INPUT: &str = r#"#!/bin/sh
src=""
out=""
flag=""
for arg in "$@"; do
    if [ "$flag" = "-cutline" ] && [ ! -f "$arg" ]; then
        echo "missing mask $arg" >&2
        exit 1
    fi
    flag="$arg"
    src="$out"
    out="$arg"
done
[ -f "$src" ] || { echo "missing $src" >&2; exit 1; }
cp "$src" "$out"
"#;

/// gdal_calc.py: copies the `-A` input to `--outfile`.
const CALC: &str = r#"#!/bin/sh
src=""
out=""
take=""
for arg in "$@"; do
    if [ "$take" = "1" ]; then
        src="$arg"
        take=""
    fi
    case "$arg" in
        -A) take="1" ;;
        --outfile=*) out="${arg#--outfile=}" ;;
    esac
done
[ -f "$src" ] || { echo "missing $src" >&2; exit 1; }
cp "$src" "$out"
"#;

/// Write the fake programs into `dir` and return a config pointing at them.
pub fn install_fake_gdal(dir: &Path) -> GdalCliConfig {
    std::fs::create_dir_all(dir).expect("Failed to create fake GDAL directory");

    let install = |name: &str, script: &str| {
        let path = dir.join(name);
        std::fs::write(&path, script).expect("Failed to write fake GDAL program");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake GDAL program executable");
        path.to_string_lossy().into_owned()
    };

    GdalCliConfig {
        gdalinfo: install("gdalinfo", GDALINFO),
        gdal_translate: install("gdal_translate", COPY_LAST_INPUT),
        gdalwarp: install("gdalwarp", COPY_LAST_INPUT),
        gdal_calc: install("gdal_calc.py", CALC),
        creation_options: vec!["COMPRESS=LZW".to_string()],
    }
}
