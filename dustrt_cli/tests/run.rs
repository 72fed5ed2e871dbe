use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::str;

const SIMULATION: &str = r#"
<MonteCarloSimulation packets="200" seed="7">
  <units><SIUnits/></units>
  <wavelengthGrid>
    <OligoWavelengthGrid wavelengths="0.55 micron"/>
  </wavelengthGrid>
  <stellarSystem>
    <StellarSystem>
      <components>
        <StellarComponent luminosity="1 Lsun">
          <geometry>
            <ShellGeometry minRadius="1 AU" maxRadius="2 AU" exponent="2"/>
          </geometry>
          <sed><FlatSED/></sed>
        </StellarComponent>
      </components>
    </StellarSystem>
  </stellarSystem>
  <instrumentSystem>
    <InstrumentSystem>
      <instruments>
        <SEDInstrument instrumentName="i0" distance="10 pc"/>
      </instruments>
    </InstrumentSystem>
  </instrumentSystem>
</MonteCarloSimulation>"#;

#[test]
fn help_requires_arguments() {
    Command::cargo_bin("dustrt")
        .unwrap()
        .assert()
        .failure()
        .stderr(str::contains("Usage"));
}

#[test]
fn run_performs_a_simulation_and_writes_its_sed() {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("model.xml").write_str(SIMULATION).unwrap();

    Command::cargo_bin("dustrt")
        .unwrap()
        .args(["run", "-b", "-t", "2", "-k"])
        .arg(dir.child("model.xml").path())
        .assert()
        .success();

    dir.child("model_i0_sed.dat").assert(str::contains("lambda (m)"));
}

#[test]
fn run_fails_on_a_broken_configuration() {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("broken.xml")
        .write_str("<MonteCarloSimulation bogus=\"1\"/>")
        .unwrap();

    Command::cargo_bin("dustrt")
        .unwrap()
        .args(["run", "-b", "-k"])
        .arg(dir.child("broken.xml").path())
        .assert()
        .failure();
}

#[test]
fn run_expands_wildcard_patterns() {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("a.xml").write_str(SIMULATION).unwrap();
    dir.child("b.xml").write_str(SIMULATION).unwrap();

    Command::cargo_bin("dustrt")
        .unwrap()
        .args(["run", "-b", "-k", "-s", "2"])
        .arg(format!("{}/*.xml", dir.path().display()))
        .assert()
        .success();

    dir.child("a_i0_sed.dat").assert(predicates::path::exists());
    dir.child("b_i0_sed.dat").assert(predicates::path::exists());
}
